use std::io::Read;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    // Logs go to stderr; stdout carries exactly one JSON response.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    let response = rebalance_server::handle_request(&input)?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
