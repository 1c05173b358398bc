//! Command line front end for the agentwire client.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use agentwire::http::{
    HttpChatTransport, HttpFeedbackSink, HttpWorkflowApi, PhoenixPromptSource, PhoenixSpanIndex,
};
use agentwire::prelude::*;
use agentwire::{PromptResolver, init_observability, submit_run_feedback};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent server URL. Overrides `AGENTWIRE_API_URL`.
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message to an agent and stream the reply.
    Chat {
        #[arg(long, short)]
        agent: String,
        message: Vec<String>,
    },
    /// Create, start and poll a workflow run.
    Workflow {
        name: String,
        /// JSON input, or a path to a JSON file.
        #[arg(long, short, default_value = "{}")]
        input: String,
        /// Use the long polling budget for multi-agent pipelines.
        #[arg(long)]
        long: bool,
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Skip trace id resolution after success.
        #[arg(long)]
        no_trace: bool,
    },
    /// Look up the trace id recorded for a workflow run.
    Trace { run_id: String },
    /// Rate a workflow run.
    Feedback {
        run_id: String,
        /// Record a thumbs-down instead of a thumbs-up.
        #[arg(long)]
        down: bool,
        #[arg(long, short)]
        comment: Option<String>,
    },
    /// Print a prompt template.
    Prompt {
        name: String,
        /// Local template used when the registry has no copy.
        #[arg(long)]
        fallback: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_observability();
    let args = Args::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(server) = args.server {
        config = config.server_url(server);
    }
    tracing::debug!(event = "cli.config_loaded", domain = "cli", server = %config.server_url, phoenix = %config.phoenix.endpoint);

    match args.command {
        Command::Chat { agent, message } => chat(config, agent, message.join(" ")).await,
        Command::Workflow {
            name,
            input,
            long,
            max_attempts,
            no_trace,
        } => {
            let mut poll = if long { PollPolicy::long() } else { config.poll.clone() };
            if let Some(max_attempts) = max_attempts {
                poll = poll.with_max_attempts(max_attempts);
            }
            workflow(config, &name, parse_input(&input)?, poll, !no_trace).await
        }
        Command::Trace { run_id } => trace(config, &run_id).await,
        Command::Feedback {
            run_id,
            down,
            comment,
        } => {
            let label = if down {
                FeedbackLabel::ThumbsDown
            } else {
                FeedbackLabel::ThumbsUp
            };
            let sink = HttpFeedbackSink::new(&config)?;
            let span =
                submit_run_feedback(&correlator(&config)?, &sink, &run_id, label, comment).await?;
            println!(
                "recorded {label:?} on span {} (trace {})",
                span.span_id, span.trace_id
            );
            Ok(())
        }
        Command::Prompt { name, fallback } => prompt(config, name, fallback).await,
    }
}

async fn chat(
    config: ClientConfig,
    agent: String,
    message: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = ChatSession::new(Arc::new(HttpChatTransport::new(config)?), agent);
    let mut stream = session.start_stream(&[ChatMessage::user(message)]).await?;
    let trace_rx = stream.take_trace_id();

    let mut stdout = std::io::stdout();
    let mut printed = 0;
    while let Some(event) = stream.next_event().await {
        match event {
            ChatEvent::Snapshot { message, .. } => {
                let text = message.text();
                if text.len() > printed {
                    write!(stdout, "{}", &text[printed..])?;
                    stdout.flush()?;
                    printed = text.len();
                }
            }
            ChatEvent::Completed { message } => {
                writeln!(stdout)?;
                for tool in message.tool_invocations() {
                    println!("[tool {}] {} {}", tool.id, tool.name, tool.args_text());
                }
            }
            ChatEvent::Error { error } => {
                writeln!(stdout)?;
                return Err(error.into());
            }
        }
    }

    if let Some(rx) = trace_rx
        && let Ok(trace_id) = rx.await
    {
        println!("trace: {trace_id}");
    }
    Ok(())
}

async fn workflow(
    config: ClientConfig,
    name: &str,
    input: serde_json::Value,
    poll: PollPolicy,
    with_trace: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = WorkflowClient::new(Arc::new(HttpWorkflowApi::new(config.clone())?));
    if with_trace {
        client = client.with_correlator(correlator(&config)?);
    }
    let outcome = client.run_with_policy(name, input, &poll).await?;
    let run_id = outcome.run_id().to_string();
    let (result, trace_id) = outcome.into_result()?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    println!("run: {run_id}");
    if let Some(trace_id) = trace_id {
        println!("trace: {trace_id}");
    }
    Ok(())
}

async fn trace(config: ClientConfig, run_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    match correlator(&config)?.resolve(run_id).await? {
        TraceResolution::Resolved {
            trace_id, span_id, ..
        } => println!("trace: {trace_id}\nspan: {span_id}"),
        TraceResolution::Unresolved(diagnostics) => {
            println!(
                "no trace for {run_id} after {} attempts: {} spans, {} workflow runs, recent run ids {:?}",
                diagnostics.attempts,
                diagnostics.spans_inspected,
                diagnostics.workflow_run_spans,
                diagnostics.sample_run_ids
            );
        }
    }
    Ok(())
}

async fn prompt(
    config: ClientConfig,
    name: String,
    fallback: Option<std::path::PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut embedded = HashMap::new();
    if let Some(path) = fallback {
        embedded.insert(name.clone(), std::fs::read_to_string(path)?);
    }
    let mut resolver = PromptResolver::new(embedded);
    if config.phoenix.prompts_enabled {
        let source = PhoenixPromptSource::new(config.phoenix.clone(), config.request_timeout)?;
        resolver = resolver.with_remote(Arc::new(source), config.phoenix.prompts_tag.clone());
    }
    let prompt = resolver.resolve(&name).await?;
    eprintln!("version {} ({:?})", prompt.version, prompt.origin);
    println!("{}", prompt.template);
    Ok(())
}

fn correlator(config: &ClientConfig) -> Result<TraceCorrelator, ClientError> {
    let index = PhoenixSpanIndex::new(config.phoenix.clone(), config.request_timeout)?;
    Ok(TraceCorrelator::new(Arc::new(index)).with_policy(config.trace_retry.clone()))
}

/// Accepts a JSON file path or an inline JSON document.
fn parse_input(raw: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let text = match std::fs::read_to_string(raw) {
        Ok(content) => content,
        Err(_) => raw.to_string(),
    };
    Ok(serde_json::from_str(&text)?)
}
