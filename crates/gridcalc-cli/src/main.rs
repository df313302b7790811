//! gridcalc CLI - evaluate formulas and recalculate CSV grids

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gridcalc::prelude::*;
use gridcalc::{evaluate, parse_formula, EvalContext, FunctionInfo};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SHEET_NAME: &str = "Sheet1";

#[derive(Parser)]
#[command(name = "gridcalc")]
#[command(
    author,
    version,
    about = "Formula evaluation and incremental recalculation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single formula with no grid and print the result
    Eval {
        /// Formula text, e.g. "=1+2*3" (the leading = is optional)
        formula: String,
    },

    /// Load a CSV grid, recalculate every formula and write the values
    Calc {
        /// Input CSV file ("-" reads stdin); cells starting with = are formulas
        input: PathBuf,

        /// Output CSV file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print recalculation statistics as JSON to stderr
        #[arg(long)]
        stats: bool,

        /// Field delimiter (default: comma)
        #[arg(short, long, default_value = ",")]
        delimiter: char,
    },

    /// List the available functions
    Functions,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Eval { formula } => eval_formula(&formula),
        Commands::Calc {
            input,
            output,
            stats,
            delimiter,
        } => calc(&input, output.as_deref(), stats, delimiter),
        Commands::Functions => list_functions(),
    }
}

fn eval_formula(formula: &str) -> Result<()> {
    let text = if formula.starts_with('=') {
        formula.to_string()
    } else {
        format!("={}", formula)
    };
    let expr = parse_formula(&text).with_context(|| format!("Failed to parse '{}'", formula))?;

    let registry = FunctionRegistry::new();
    match evaluate(&expr, &EvalContext::detached(&registry)) {
        Ok(value) => println!("{}", display_value(&value)),
        Err(e) => {
            println!("{}", e.code);
            eprintln!("{}", e);
        }
    }
    Ok(())
}

/// Arrays print one row per line, tab separated
fn display_value(value: &Value) -> String {
    match value {
        Value::Array(rows) => rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(Value::as_text)
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.as_text(),
    }
}

fn calc(input: &Path, output: Option<&Path>, show_stats: bool, delimiter: char) -> Result<()> {
    let delimiter = u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .with_context(|| format!("Delimiter '{}' is not a single ASCII character", delimiter))?;

    let source = if input == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to open '{}'", input.display()))?
    };

    let grid = Arc::new(InMemoryGrid::with_sheets(&[SHEET_NAME])?);
    let mut engine = Engine::new(Arc::clone(&grid));
    let sheet = load_csv(&grid, &mut engine, &source, delimiter)?;

    let stats = engine
        .recalculate(sheet, None, RecalcOptions::default())
        .context("Failed to recalculate")?;
    tracing::debug!(
        formulas = engine.formula_count(),
        evaluated = stats.cells_evaluated,
        "grid recalculated"
    );

    let Some(used) = grid.used_range(sheet) else {
        eprintln!("Warning: input is empty");
        return Ok(());
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(Vec::new());
    for row in used.start.row..=used.end.row {
        let fields: Vec<String> = (used.start.col..=used.end.col)
            .map(|col| grid.get_value_at(CellKey::new(sheet, row, col)).as_text())
            .collect();
        writer
            .write_record(&fields)
            .context("Failed to encode CSV")?;
    }
    let bytes = writer.into_inner().context("Failed to encode CSV")?;

    if let Some(output_path) = output {
        std::fs::write(output_path, &bytes)
            .with_context(|| format!("Failed to write '{}'", output_path.display()))?;
        eprintln!(
            "Wrote {} rows to '{}'",
            used.row_count(),
            output_path.display()
        );
    } else {
        io::stdout()
            .write_all(&bytes)
            .context("Failed to write to stdout")?;
    }

    if show_stats {
        let json = serde_json::to_string_pretty(&stats).context("Failed to encode stats")?;
        eprintln!("{}", json);
    }

    Ok(())
}

/// Fill the grid from CSV text and register every formula with the engine
fn load_csv(
    grid: &InMemoryGrid,
    engine: &mut Engine<InMemoryGrid>,
    source: &str,
    delimiter: u8,
) -> Result<usize> {
    let sheet = grid
        .sheet_index(SHEET_NAME)
        .with_context(|| format!("Sheet '{}' missing", SHEET_NAME))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(source.as_bytes());

    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV row {}", row + 1))?;
        let row = u32::try_from(row).context("Too many rows")?;
        for (col, field) in record.iter().enumerate() {
            let col = u16::try_from(col).context("Too many columns")?;
            let key = CellKey::new(sheet, row, col);
            if field.starts_with('=') {
                grid.set_formula_at(key, field)?;
                engine.set_formula(key, field);
            } else {
                grid.set_value_at(key, parse_literal(field))?;
            }
        }
    }
    Ok(sheet)
}

/// Interpret a non-formula CSV field
fn parse_literal(field: &str) -> Value {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Value::Empty;
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        if n.is_finite() {
            return Value::Number(n);
        }
    }
    if trimmed.eq_ignore_ascii_case("TRUE") {
        return Value::Boolean(true);
    }
    if trimmed.eq_ignore_ascii_case("FALSE") {
        return Value::Boolean(false);
    }
    if let Some(code) = CellError::from_code(trimmed) {
        return Value::Error(code);
    }
    Value::Text(field.to_string())
}

fn list_functions() -> Result<()> {
    let registry = FunctionRegistry::new();
    let catalog = registry.catalog();
    if catalog.is_empty() {
        bail!("No functions registered");
    }

    let mut stdout = io::stdout().lock();
    for info in &catalog {
        let kind = if info.is_async { "async" } else { "" };
        writeln!(
            stdout,
            "{:<12} {:<6} {:<5} {}",
            info.name,
            arity(info),
            kind,
            info.description
        )
        .context("Failed to write to stdout")?;
    }
    Ok(())
}

fn arity(info: &FunctionInfo) -> String {
    match info.max_args {
        _ if info.variadic => format!("{}+", info.arg_count),
        Some(max) if max > info.arg_count => format!("{}-{}", info.arg_count, max),
        _ => info.arg_count.to_string(),
    }
}
