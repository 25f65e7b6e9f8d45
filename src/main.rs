use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use ordermq::broker::Broker;
use ordermq::client::{Producer, PushConsumer};
use ordermq::config::{Settings, load_config_from};
use ordermq::consume::BatchConsumer;
use ordermq::demo::{OrderLogHandler, dispatch_orders, sample_orders};
use ordermq::dispatch::OrderedDispatcher;
use ordermq::utils::error::SettingsError;
use ordermq::utils::logging;

#[derive(Parser)]
#[command(name = "ordermq", version, about = "Ordered message dispatch with batch-retry consumption")]
struct Cli {
    /// Configuration file, without extension
    #[arg(short, long, default_value = "config/default")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the broker, the ordered dispatcher and the consumer, then send demo orders
    Run {
        /// Number of demo order events to send
        #[arg(long, default_value_t = 10)]
        orders: usize,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = load_config_from(&cli.config)?;

    match cli.command.unwrap_or(Command::Run { orders: 10 }) {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Run { orders } => {
            logging::init(&settings.log_level);
            run(settings, orders).await
        }
    }
}

async fn run(settings: Settings, order_count: usize) -> Result<(), Box<dyn Error>> {
    let broker = Arc::new(Broker::new(settings.broker.clone()));
    let namesrv_addr = settings.broker.namesrv_addr.as_str();

    let producer = Producer::new(broker.clone(), namesrv_addr, settings.producer.clone());
    let dispatcher = OrderedDispatcher::new(producer, &settings.producer);
    dispatcher.start().await?;

    // the consumer goes last, once everything it may touch is up
    let consumer = PushConsumer::new(broker.clone(), namesrv_addr, settings.consumer.clone());
    consumer.subscribe_configured()?;
    consumer.register_batch_handler(BatchConsumer::new(OrderLogHandler));
    consumer.start()?;

    let topic = settings
        .consumer
        .subscriptions()?
        .into_iter()
        .next()
        .map(|subscription| subscription.topic)
        .ok_or(SettingsError::Missing("consumer.topics_and_tags"))?;
    let orders: Vec<_> = sample_orders().into_iter().cycle().take(order_count).collect();
    let sent = dispatch_orders(&dispatcher, &topic, &orders)?;
    info!(topic = %topic, sent, "demo orders queued, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    consumer.shutdown().await;
    dispatcher.stop().await;
    Ok(())
}
