use std::{error::Error, path::PathBuf};

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use wdi_etl::{
    config::PipelineConfig,
    db::prod_db::ProdDb,
    error::StageError,
    notify::{FailureContext, Notifier},
    pipeline::{Pipeline, Stage},
    records::{Cell, WideRow},
    transform::ascii_table,
};

#[derive(Parser, Debug)]
#[command(version, about = "World Bank indicators into DuckDB", long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Registry file, overrides CONFIG_FILE.  The built-in ECOWAS registry
    /// is used if neither is set.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the indicators into the landing file
    Extract,
    /// Check the landing file
    Validate,
    /// Pivot the landing file and print the wide rows
    Transform,
    /// Upsert the landing file into DuckDB, then remove it
    Load,
    /// All the stages, with retries
    Run,
    /// Print what is in the table
    Show {
        /// ISO3 country code
        #[arg(long)]
        country: Option<String>,
    },
    /// Send a test alert
    NotifyTest,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let env_file = PathBuf::from(format!(".env/{}.env", args.env));
    if let Err(e) = dotenvy::from_path(&env_file) {
        warn!("could not load {}: {}", env_file.display(), e);
    }

    let config = PipelineConfig::load(args.config.as_deref())?;
    let pipeline = Pipeline::new(config, ProdDb::world_bank_indicators())?;
    let notifier = Notifier::from_env();

    let res = match args.command {
        Command::Extract => pipeline.extract_with_retry().await.and_then(|extraction| {
            info!(
                "{} records in the landing file, {} failed series",
                extraction.records.len(),
                extraction.failures.len()
            );
            Pipeline::check_complete(&extraction)
        }),
        Command::Validate => pipeline.validate().map(|validated| {
            info!("all {} records are valid", validated.len());
        }),
        Command::Transform => pipeline.transform().map(|rows| {
            println!("{}", ascii_table(&pipeline.config, &rows));
        }),
        Command::Load => pipeline.load().map(|summary| info!("{}", summary)),
        Command::Run => pipeline.run().await.map(|summary| info!("{}", summary)),
        Command::Show { country } => {
            let rows = pipeline
                .archive
                .get_data(&pipeline.config, country.as_deref())?
                .into_iter()
                .map(|row| WideRow {
                    country_code: row.country_code,
                    country_name: row.country_name,
                    year: row.year,
                    cells: row.values.into_iter().map(Cell::from).collect(),
                })
                .collect::<Vec<_>>();
            println!("{}", ascii_table(&pipeline.config, &rows));
            Ok(())
        }
        Command::NotifyTest => {
            let context = FailureContext::new(
                &pipeline.config.pipeline_name,
                Stage::Extract,
                &"this is a test alert, nothing failed",
            );
            if !notifier.notify(&context).await {
                return Err("the test alert was not sent".into());
            }
            Ok(())
        }
    };

    if let Err(e) = res {
        alert(&notifier, &pipeline, &e).await;
        return Err(e.into());
    }
    Ok(())
}

async fn alert(notifier: &Notifier, pipeline: &Pipeline, e: &StageError) {
    error!("{}", e);
    let context = FailureContext::new(&pipeline.config.pipeline_name, e.stage, &e.error);
    notifier.notify(&context).await;
}
