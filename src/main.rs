use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use wxcast_core::{App, AppError};
use wxcast_predict::Location;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Predict tomorrow's average temperature from recent history"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Predict tomorrow's mean temperature
    Predict {
        /// Location name, e.g. "Chicago" or "Chicago, IL" (defaults to the selected one)
        #[arg(short, long)]
        location: Option<String>,
    },
    /// Fetch and fit a model without saving it, then report the result
    Check {
        #[arg(short, long)]
        location: Option<String>,
    },
    /// List known locations
    Locations,
    /// Select the current location
    Select {
        name: String,
    },
    /// Add a location to the list
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        region: String,
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    wxcast_core::init()?;

    let mut app = App::new().context("Failed to start wxcast")?;
    let outcome = run(&mut app, cli.command).await;

    if let Err(e) = app.shutdown() {
        tracing::error!("Error during shutdown: {}", e);
    }

    outcome.map_err(|e| {
        tracing::error!("{}", e);
        if e.is_retryable() {
            anyhow::anyhow!("{} This is likely temporary; try again shortly.", e.user_message())
        } else {
            anyhow::anyhow!("{}", e.user_message())
        }
    })
}

async fn run(app: &mut App, command: Command) -> Result<(), AppError> {
    match command {
        Command::Predict { location } => {
            let prediction = app.predict(location.as_deref()).await?;
            println!("{}", prediction);
        }
        Command::Check { location } => {
            let report = app.check(location.as_deref()).await?;
            let model = report.prediction.model;
            println!(
                "Window: {} to {} ({} hourly samples)",
                report.window.start_date, report.window.end_date, report.hourly_samples
            );
            if let Some(summary) = &report.summary {
                println!(
                    "Training data: {} days, {} to {}, min {:.1}°F, max {:.1}°F, avg {:.1}°F",
                    summary.count,
                    summary.first_date,
                    summary.last_date,
                    summary.min_f,
                    summary.max_f,
                    summary.mean_f
                );
            }
            println!(
                "Model: y = {:.4}x + {:.2} ({} points)",
                model.slope, model.intercept, model.training_point_count
            );
            println!("{}", report.prediction);
        }
        Command::Locations => {
            let current = app.current_location()?.display_name();
            for location in app.locations() {
                let marker = if location.display_name() == current { "*" } else { " " };
                println!(
                    "{} {} ({:.2}, {:.2})",
                    marker,
                    location.display_name(),
                    location.latitude,
                    location.longitude
                );
            }
        }
        Command::Select { name } => {
            let location = app.select_location(&name)?;
            println!("Current location: {}", location);
        }
        Command::Add {
            name,
            region,
            latitude,
            longitude,
        } => {
            let location = Location::new(name, region, latitude, longitude)?;
            app.add_location(location.clone())?;
            println!("Added {}", location);
        }
    }
    Ok(())
}
