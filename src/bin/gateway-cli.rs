use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use url::Url;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Operator CLI for the presence gateway admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status and counters
    Status,
    /// Reputation records with their tier
    Clients,
    /// Blocked identities
    Blocked,
    /// Release a blocked identity and reset its record
    Unblock {
        identity: String,
    },
    /// Push a notification to a user's live connections
    Notify {
        user_id: u64,
        message: String,
        #[arg(long, default_value = "notification")]
        kind: String,
    },
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, Box<dyn std::error::Error>> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| "admin URL cannot be a base")?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let base = Url::parse(&cli.url)?;
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match &cli.command {
        Commands::Status => client.get(endpoint(&base, &["admin", "status"])?),
        Commands::Clients => client.get(endpoint(&base, &["admin", "clients"])?),
        Commands::Blocked => client.get(endpoint(&base, &["admin", "blocked"])?),
        Commands::Unblock { identity } => {
            client.delete(endpoint(&base, &["admin", "blocked", identity.as_str()])?)
        }
        Commands::Notify {
            user_id,
            message,
            kind,
        } => {
            let user = user_id.to_string();
            client
                .post(endpoint(&base, &["admin", "notify", &user])?)
                .json(&json!({ "type": kind, "message": message }))
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
