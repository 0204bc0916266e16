use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rrc::config::Config;
use rrc::restaurants::{Restaurant, Review, ReviewsClient, ALL};

#[derive(Parser, Debug)]
#[command(name = "rrc")]
#[command(about = "An offline-first client for restaurant reviews")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/rrc/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Reviews server URL
  #[arg(short, long)]
  server: Option<String>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List restaurants
  List {
    #[arg(long, default_value = ALL)]
    cuisine: String,
    #[arg(long, default_value = ALL)]
    neighborhood: String,
  },
  /// Show one restaurant
  Show { id: u64 },
  /// List reviews of a restaurant
  Reviews { id: u64 },
  /// Post a review
  Review {
    id: u64,
    #[arg(long)]
    author: String,
    #[arg(long)]
    rating: u8,
    #[arg(long)]
    body: String,
  },
  /// Toggle a restaurant's favorite flag
  Favorite { id: u64 },
  /// List neighborhoods
  Neighborhoods,
  /// List cuisines
  Cuisines,
  /// Send pending writes to the server
  Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override server if specified on command line
  if let Some(server) = args.server {
    config.server.url = server;
  }

  let client = ReviewsClient::new(&config)?;
  run(&client, args.command).await?;
  client.close();

  Ok(())
}

async fn run(client: &ReviewsClient, command: Command) -> Result<()> {
  match command {
    Command::List {
      cuisine,
      neighborhood,
    } => {
      for restaurant in client
        .list_restaurants_filtered(&cuisine, &neighborhood)
        .await?
      {
        print_restaurant(&restaurant);
      }
    }
    Command::Show { id } => {
      let restaurant = client.get_restaurant(id).await?;
      print_restaurant(&restaurant);
      println!("  {}", restaurant.address);
      for (day, hours) in &restaurant.operating_hours {
        println!("  {:<10} {}", day, hours);
      }
    }
    Command::Reviews { id } => {
      for review in client.list_reviews_for(id).await? {
        print_review(&review);
      }
    }
    Command::Review {
      id,
      author,
      rating,
      body,
    } => {
      let review = client.add_review(id, &author, rating, &body).await?;
      print_review(&review);
    }
    Command::Favorite { id } => {
      let restaurant = client.get_restaurant(id).await?;
      let restaurant = client.toggle_favorite(&restaurant).await?;
      print_restaurant(&restaurant);
    }
    Command::Neighborhoods => {
      for neighborhood in client.list_neighborhoods().await? {
        println!("{}", neighborhood);
      }
    }
    Command::Cuisines => {
      for cuisine in client.list_cuisines().await? {
        println!("{}", cuisine);
      }
    }
    Command::Sync => {
      let report = client.sync().await;
      println!(
        "confirmed {}, still pending {}, rejected {}",
        report.confirmed, report.pending, report.rejected
      );
    }
  }

  Ok(())
}

fn print_restaurant(restaurant: &Restaurant) {
  println!(
    "{:>4}  {}{}  [{}, {}]{}",
    restaurant.id,
    restaurant.name,
    if restaurant.is_favorite { " *" } else { "" },
    restaurant.cuisine_type,
    restaurant.neighborhood,
    if restaurant.pending { "  (pending)" } else { "" },
  );
}

fn print_review(review: &Review) {
  let date = review
    .created_at
    .map(|dt| dt.format("%Y-%m-%d").to_string())
    .unwrap_or_default();
  println!(
    "{}  {} ({}/5) {}{}",
    date,
    review.author_name,
    review.rating,
    review.body,
    if review.pending { "  (pending)" } else { "" },
  );
}

/// Log to a daily file under the data directory, or to stderr when verbose.
fn init_logging(verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("RRC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  if verbose {
    tracing_subscriber::registry()
      .with(filter)
      .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
      .init();
    return Ok(None);
  }

  let log_dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("rrc")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "rrc.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .init();

  Ok(Some(guard))
}
