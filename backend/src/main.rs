//! xmlmigrate CLI - Inspect contracts and dry-run document loads
//!
//! # Main Commands
//!
//! ```bash
//! xmlmigrate validate contract.json             # Validate a mapping contract
//! xmlmigrate transform contract.json doc.json   # Resolved records as JSON
//! xmlmigrate plan contract.json doc.json        # T-SQL script of the load
//! xmlmigrate diagnostics list                   # Inspect load failures
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! xmlmigrate eval "a + (b * 12)" -f a=6 -f b=5  # Evaluate a calculated field
//! ```

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xmlmigrate::transform::expr::Context;
use xmlmigrate::{
    load_contract, load_document, transform_document, validate_contract_document, BulkLoader, DiagnosticStore,
    Expression, LoaderConfig, MappingContract, ParsedDocument, ScriptCursor, SqlValue,
};

#[derive(Parser)]
#[command(name = "xmlmigrate")]
#[command(about = "Contract-driven XML to SQL Server migration", long_about = None)]
struct Cli {
    /// Loader configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Diagnostics directory (overrides configuration)
    #[arg(long, global = true)]
    diagnostics_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a mapping contract
    Validate {
        /// Contract JSON file
        contract: PathBuf,
    },

    /// Evaluate a calculated-field expression
    Eval {
        /// Expression text
        expression: String,

        /// Field value as name=value (repeatable)
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },

    /// Resolve a document into records
    Transform {
        /// Contract JSON file
        contract: PathBuf,
        /// Parsed document JSON file
        document: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Dry-run a load and print the T-SQL it would execute
    Plan {
        /// Contract JSON file
        contract: PathBuf,
        /// Parsed document JSON file
        document: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage stored load diagnostics
    Diagnostics {
        #[command(subcommand)]
        action: DiagnosticsAction,
    },
}

#[derive(Subcommand)]
enum DiagnosticsAction {
    /// List stored diagnostics
    List,

    /// Show one diagnostic
    Show {
        /// Diagnostic ID
        id: String,
    },

    /// Delete a diagnostic
    Delete {
        /// Diagnostic ID
        id: String,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match LoaderConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ Error: {}", e);
                std::process::exit(1);
            }
        },
        None => LoaderConfig::from_env(),
    };
    let config = match cli.diagnostics_dir {
        Some(dir) => config.with_diagnostics_dir(dir),
        None => config,
    };

    let result = match cli.command {
        Commands::Validate { contract } => cmd_validate(&contract),
        Commands::Eval { expression, fields } => cmd_eval(&expression, &fields),
        Commands::Transform {
            contract,
            document,
            output,
        } => cmd_transform(&contract, &document, output.as_deref(), &config),
        Commands::Plan {
            contract,
            document,
            output,
        } => cmd_plan(&contract, &document, output.as_deref(), config),
        Commands::Diagnostics { action } => cmd_diagnostics(action, &config),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_validate(path: &Path) -> CliResult {
    eprintln!("✔️  Validating: {}", path.display());

    let content = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;

    if let Err(errors) = validate_contract_document(&value) {
        eprintln!("\n❌ {} schema violations:", errors.len());
        for err in errors.iter().take(10) {
            eprintln!("   - {}", err);
        }
        std::process::exit(1);
    }

    let contract = MappingContract::from_value(value)?;
    eprintln!(
        "✅ Contract valid: {} mappings over {} tables",
        contract.mappings.len(),
        contract.tables().len()
    );
    Ok(())
}

fn cmd_eval(expression: &str, fields: &[String]) -> CliResult {
    let mut ctx = Context::new();
    for field in fields {
        let (name, value) = field
            .split_once('=')
            .ok_or_else(|| format!("field must be name=value: {}", field))?;
        ctx.insert(name.trim().to_string(), SqlValue::from(value));
    }

    let compiled = Expression::compile("expression", expression)?;
    let value = compiled.evaluate("expression", &ctx)?;
    println!("{}", value.into_sql().to_sql_literal());
    Ok(())
}

fn read_document(path: &Path) -> Result<ParsedDocument, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    Ok(ParsedDocument::from_json(&value)?)
}

fn cmd_transform(contract: &Path, document: &Path, output: Option<&Path>, config: &LoaderConfig) -> CliResult {
    eprintln!("📄 Processing: {}", document.display());

    let contract: Arc<MappingContract> = load_contract(contract, config)?;
    let doc = read_document(document)?;
    eprintln!("   Elements: {}", doc.len());

    let records = transform_document(&contract, &doc)?;
    eprintln!("⚙️  Resolved: {} records", records.len());

    let json = serde_json::to_string_pretty(&records)?;
    write_output(&json, output)
}

fn cmd_plan(contract: &Path, document: &Path, output: Option<&Path>, config: LoaderConfig) -> CliResult {
    eprintln!("📄 Planning: {}", document.display());

    let contract = load_contract(contract, &config)?;
    let doc = read_document(document)?;

    let mut loader = BulkLoader::new(config);
    let mut cursor = ScriptCursor::new();
    let summary = load_document(&contract, &doc, &mut loader, &mut cursor)?;

    for table in &summary.tables {
        eprintln!("   {}: {} rows", table.qualified_table, table.applied);
    }
    eprintln!("\n✨ {} statements", cursor.statements().len());

    write_output(&cursor.script(), output)
}

fn cmd_diagnostics(action: DiagnosticsAction, config: &LoaderConfig) -> CliResult {
    let store = DiagnosticStore::with_dir(&config.diagnostics_dir);

    match action {
        DiagnosticsAction::List => {
            let diagnostics = store.list();
            if diagnostics.is_empty() {
                eprintln!("No diagnostics in {}", store.dir().display());
                return Ok(());
            }

            eprintln!("📋 {} diagnostics:\n", diagnostics.len());
            for d in diagnostics {
                eprintln!("  {} | {} | {} | {}", d.id, d.created_at.format("%Y-%m-%d %H:%M:%S"), d.table, d.error_kind);
                eprintln!("    {}", d.error_message);
            }
        }

        DiagnosticsAction::Show { id } => {
            let diagnostic = store
                .get(&id)
                .ok_or_else(|| format!("Diagnostic not found: {}", id))?;
            println!("{}", serde_json::to_string_pretty(&diagnostic)?);
        }

        DiagnosticsAction::Delete { id } => {
            store.delete(&id)?;
            eprintln!("🗑️  Deleted diagnostic: {}", id);
        }
    }

    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("   💾 Saved to: {}", p.display());
        }
        None => {
            print!("{}", content);
            if !content.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}
