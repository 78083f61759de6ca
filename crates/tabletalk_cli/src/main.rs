use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use tabletalk_api::{QueryResponse, UploadResponse};

#[derive(Parser, Debug)]
#[command(version, about = "TableTalk — chat with an uploaded CSV through the agent backend")]
struct Cli {
    /// Backend base URL
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a CSV and (re)build the analysis session
    Upload {
        #[arg(long)]
        path: PathBuf,
    },
    /// Ask a single question against the uploaded dataset
    Ask {
        #[arg(long)]
        question: String,
    },
    /// Interactive chat loop; plots are written to plot-<n>.png
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Upload { path } => upload(&client, &cli.server, &path).await,
        Commands::Ask { question } => {
            let mut plot_counter = 0usize;
            ask(&client, &cli.server, &question, &mut plot_counter).await
        }
        Commands::Chat => chat(&client, &cli.server).await,
    }
}

async fn upload(client: &reqwest::Client, server: &str, path: &PathBuf) -> Result<()> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no usable file name")?
        .to_string();
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
    let form = reqwest::multipart::Form::new().part("file", part);
    let resp = client.post(format!("{server}/upload")).multipart(form).send().await?;

    if !resp.status().is_success() {
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        bail!("upload failed: {}", body["detail"].as_str().unwrap_or("unknown error"));
    }
    let body: UploadResponse = resp.json().await?;
    println!("{}", body.message);
    println!("  rows: {}, cols: {}", body.shape.0, body.shape.1);
    println!("  columns: {}", body.columns.join(", "));
    Ok(())
}

async fn ask(
    client: &reqwest::Client,
    server: &str,
    question: &str,
    plot_counter: &mut usize,
) -> Result<()> {
    let resp = client
        .post(format!("{server}/invoke"))
        .json(&serde_json::json!({ "input": question }))
        .send()
        .await?;

    if !resp.status().is_success() {
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        bail!("query failed: {}", body["detail"].as_str().unwrap_or("unknown error"));
    }
    let body: QueryResponse = resp.json().await?;
    println!("{}", body.final_answer);

    if let Some(encoded) = body.generated_plot {
        let png = STANDARD.decode(encoded).context("backend returned an invalid plot payload")?;
        *plot_counter += 1;
        let path = format!("plot-{plot_counter}.png");
        std::fs::write(&path, png)?;
        println!("[plot written to {path}]");
    }
    Ok(())
}

async fn chat(client: &reqwest::Client, server: &str) -> Result<()> {
    println!("TableTalk chat — empty line or Ctrl-D to quit.");
    let stdin = std::io::stdin();
    let mut plot_counter = 0usize;
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            break;
        }
        if let Err(e) = ask(client, server, question, &mut plot_counter).await {
            eprintln!("{e:#}");
        }
    }
    Ok(())
}
