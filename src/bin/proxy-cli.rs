use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use embed_proxy::proxy::rewriter::{encoding_for, rewrite_html, RewriteContext};
use embed_proxy::proxy::validate_target;

#[derive(Parser)]
#[command(name = "embed-proxy-cli")]
#[command(about = "Inspect a running embed-proxy or rewrite pages offline", long_about = None)]
struct Cli {
    /// Base URL of the running proxy
    #[arg(short, long, default_value = "http://localhost:3002")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the liveness endpoint
    Health,
    /// Fetch a page through the proxy and summarize the response
    Fetch {
        target: String,
        /// Skip HTML rewriting
        #[arg(long)]
        raw: bool,
    },
    /// Rewrite a local HTML file as if it had been fetched from `origin`
    Rewrite {
        file: PathBuf,
        #[arg(long)]
        origin: String,
        /// Charset of the file, when not UTF-8
        #[arg(long)]
        charset: Option<String>,
        /// Leave out the neutralization script
        #[arg(long)]
        no_script: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Health => {
            let client = reqwest::Client::new();
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_json(res).await?;
        }
        Commands::Fetch { target, raw } => {
            let client = reqwest::Client::new();
            let format = if raw { "raw" } else { "html" };
            let res = client
                .get(format!("{}/proxy", cli.url))
                .query(&[("url", target.as_str()), ("format", format)])
                .send()
                .await?;
            print_summary(res).await?;
        }
        Commands::Rewrite {
            file,
            origin,
            charset,
            no_script,
        } => {
            let target = validate_target(&origin)?;
            let input = std::fs::read(&file)?;
            let content_type = charset.map(|c| format!("text/html; charset={}", c));
            let ctx = RewriteContext::new(target.origin).with_script(!no_script);

            let rewritten = rewrite_html(&input, &ctx, encoding_for(content_type.as_deref()))?;
            eprintln!(
                "urls_rewritten={} meta_removed={} scripts_removed={} base_inserted={} script_injected={}",
                rewritten.stats.urls_rewritten,
                rewritten.stats.meta_removed,
                rewritten.stats.scripts_removed,
                rewritten.stats.base_inserted,
                rewritten.stats.script_injected,
            );
            println!("{}", String::from_utf8_lossy(&rewritten.body));
        }
    }

    Ok(())
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: proxy returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn print_summary(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", res.status());
    for (name, value) in res.headers() {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }

    let status = res.status();
    let body = res.bytes().await?;
    if status.is_success() {
        println!("\n{} bytes", body.len());
    } else if let Ok(json) = serde_json::from_slice::<Value>(&body) {
        println!("\n{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("\n{}", String::from_utf8_lossy(&body));
    }
    Ok(())
}
