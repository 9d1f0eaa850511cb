use anyhow::Context;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;

use campaign_ops::infrastructure::destinations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let bootstrap =
        std::env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string());
    let partitions: i32 = std::env::var("TOPIC_PARTITIONS")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3);

    let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &bootstrap)
        .create()
        .context("Failed to create admin client")?;

    let topics: Vec<NewTopic> = destinations::ALL
        .iter()
        .map(|name| NewTopic::new(name, partitions, TopicReplication::Fixed(1)))
        .collect();

    let results = admin_client
        .create_topics(&topics, &AdminOptions::new())
        .await
        .context("Failed to create topics")?;

    for result in results {
        match result {
            Ok(topic) => println!("Created topic: {}", topic),
            Err((topic, e)) => println!("Failed to create topic {}: {}", topic, e),
        }
    }
    Ok(())
}
