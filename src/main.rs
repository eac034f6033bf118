use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Use library instead of local modules
use loan_desk::{
    cancel_pair, shared_provider, AppConfig, Borrower, CommandInterpreter, EntityResolver,
    InstructionParser, Loan, LoanStatus, LoanType, RetryPolicy, SqliteStore,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "loan-desk", version, about = "Loan payment command interpreter")]
struct Cli {
    /// SQLite database path (overrides LOAN_DESK_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Register a borrower
    AddBorrower {
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Register a loan for a borrower, matched by name
    AddLoan {
        borrower: String,
        /// Home, Auto, Personal, Education or Business
        loan_type: LoanType,
        amount: f64,
        /// Annual interest rate in percent
        rate: f64,
        years: u32,
        /// Total payable (principal + interest)
        total: f64,
        #[arg(long, default_value = "Active")]
        status: LoanStatus,
    },
    /// Parse one instruction line offline and print it as JSON
    Parse { instruction: String },
    /// Run a voice command through the full pipeline
    Run { command: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    loan_desk::config::load_dotenv();
    loan_desk::config::init_tracing("loan_desk=info");

    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("invalid configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Command::Init => run_init(&config),
        Command::AddBorrower { name, email, phone } => {
            run_add_borrower(&config, &name, email.as_deref(), phone.as_deref())
        }
        Command::AddLoan {
            borrower,
            loan_type,
            amount,
            rate,
            years,
            total,
            status,
        } => {
            let open = open_store(&config)?;
            let resolved = EntityResolver::new(Arc::new(open.clone()))
                .resolve_borrower(&borrower)?;
            let Some(resolved) = resolved else {
                bail!("no borrower matches {:?}", borrower);
            };

            let loan = Loan::new(&resolved.entity.id, loan_type, amount, rate, years, total)
                .with_status(status);
            open.insert_loan(&loan)?;
            println!("✓ Loan added for {}", resolved.entity.full_name);
            println!("{}", serde_json::to_string_pretty(&loan)?);
            Ok(())
        }
        Command::Parse { instruction } => run_parse(&instruction),
        Command::Run { command } => run_command(&config, &command).await,
    }
}

fn run_init(config: &AppConfig) -> Result<()> {
    println!("🗄️  Loan Desk - SQLite + WAL");
    open_store(config)?;
    println!("✓ Database initialized at {}", config.database_path.display());
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("cannot open {}", config.database_path.display()))
}

fn run_add_borrower(
    config: &AppConfig,
    name: &str,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<()> {
    if name.trim().is_empty() {
        bail!("borrower name is required");
    }

    let mut borrower = Borrower::new(name);
    if let Some(email) = email {
        borrower = borrower.with_email(email);
    }
    if let Some(phone) = phone {
        borrower = borrower.with_phone(phone);
    }

    open_store(config)?.insert_borrower(&borrower)?;
    println!("✓ Borrower added");
    println!("{}", serde_json::to_string_pretty(&borrower)?);
    Ok(())
}

fn run_parse(instruction: &str) -> Result<()> {
    let parsed = InstructionParser::new().parse(instruction)?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

async fn run_command(config: &AppConfig, command: &str) -> Result<()> {
    let store = open_store(config)?;
    let provider = shared_provider(config).context("completion provider unavailable")?;

    let interpreter = CommandInterpreter::from_parts(
        provider,
        Arc::new(store),
        RetryPolicy::new().with_attempt_timeout(config.provider_timeout),
    );

    // Ctrl+C cancels the command before any write starts
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let outcome = interpreter.process(command, &signal).await;
    println!("{}", serde_json::to_string_pretty(&outcome.to_response())?);

    if outcome.status_code() != 200 {
        std::process::exit(1);
    }
    Ok(())
}
