//! tfo-mcp: MCP server with a streaming Claude proxy
//!
//! Speaks line-delimited JSON-RPC 2.0 over stdio and mediates between
//! the connected client and the Claude API. stderr carries logs; stdout
//! carries only protocol frames.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use tfo_mcp::claude::ProxyConfig;
use tfo_mcp::config::{default_config_path, Config};
use tfo_mcp::content::Message;
use tfo_mcp::conversation::Conversation;
use tfo_mcp::prompt::{Prompt, PromptArgument};
use tfo_mcp::protocol::CallToolResult;
use tfo_mcp::resource::Resource;
use tfo_mcp::tool::ToolBuilder;
use tfo_mcp::values::{MimeType, ResourceUri, Role, SystemPrompt, ToolName};
use tfo_mcp::{
    ClaudeProxy, Dispatcher, DispatcherConfig, Error, HttpClaudeClient, Session, StdioTransport,
};

/// MCP server mediating between MCP clients and the Claude API.
#[derive(Parser, Debug)]
#[command(name = "tfo-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber. Logs go to stderr; stdout is the
/// protocol channel.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ChatInput {
    /// The user message to send to the model.
    message: String,
}

/// Seed the session's catalog once the client completes initialization.
fn seed_catalog(session: &Arc<Session>, proxy: Option<&ClaudeProxy>, config: &Config) {
    let info = Resource::new(
        ResourceUri::new("tfo-mcp://server/info").expect("static uri"),
        "Server information",
    )
    .with_mime_type(MimeType::new("application/json"))
    .with_text(
        serde_json::json!({
            "name": "tfo-mcp",
            "version": env!("CARGO_PKG_VERSION"),
            "model": config.claude.model.as_str(),
        })
        .to_string(),
    );
    if let Err(e) = session.register_resource(info) {
        tracing::warn!(error = %e, "failed to register server info resource");
    }

    let summarize = Prompt::new(ToolName::new("summarize").expect("static name"))
        .with_description("Summarize a topic in a few sentences")
        .with_argument(PromptArgument::required("topic").with_description("What to summarize"))
        .with_message(Role::User, "Summarize {topic} in at most three sentences.");
    if let Err(e) = session.register_prompt(summarize) {
        tracing::warn!(error = %e, "failed to register summarize prompt");
    }

    let Some(proxy) = proxy else {
        tracing::warn!("no API key configured; chat tool not registered");
        return;
    };

    let chat_session = session.clone();
    let chat_proxy = proxy.clone();
    let claude = config.claude.clone();
    let conversation: Arc<Mutex<Option<Arc<Conversation>>>> = Arc::new(Mutex::new(None));

    let chat = ToolBuilder::new("chat")
        .description("Send a message to Claude and return its reply")
        .handler(move |input: ChatInput| {
            let session = chat_session.clone();
            let proxy = chat_proxy.clone();
            let claude = claude.clone();
            let slot = conversation.clone();
            async move {
                let conversation = {
                    let mut guard = slot.lock().unwrap();
                    match guard.as_ref() {
                        Some(existing) => existing.clone(),
                        None => {
                            let fresh =
                                Arc::new(Conversation::new(session.id(), claude.model));
                            fresh
                                .set_max_tokens(claude.max_tokens)
                                .map_err(Error::tool)?;
                            fresh
                                .set_temperature(claude.temperature)
                                .map_err(Error::tool)?;
                            fresh.set_top_p(claude.top_p).map_err(Error::tool)?;
                            fresh.set_top_k(claude.top_k).map_err(Error::tool)?;
                            fresh
                                .set_system_prompt(
                                    SystemPrompt::new("You are a helpful assistant.")
                                        .map_err(Error::tool)?,
                                )
                                .map_err(Error::tool)?;

                            // Expose the session's other tools to the model.
                            if let Ok(tools) = session.tools() {
                                for tool in tools {
                                    if tool.name().as_str() != "chat" {
                                        let _ = fresh.register_tool(tool);
                                    }
                                }
                            }

                            session.add_conversation(fresh.clone()).map_err(Error::tool)?;
                            *guard = Some(fresh.clone());
                            fresh
                        }
                    }
                };

                conversation
                    .add_message(Message::user_text(input.message))
                    .map_err(Error::tool)?;

                let response = proxy
                    .execute(&session, &conversation, &CancellationToken::new())
                    .await
                    .map_err(Error::tool)?;

                Ok(CallToolResult::text(response.text()))
            }
        })
        .build();

    match chat {
        Ok(tool) => {
            if let Err(e) = session.register_tool(tool) {
                tracing::warn!(error = %e, "failed to register chat tool");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to build chat tool"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| {
        default_config_path().filter(|p| p.is_file())
    });
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_level = get_log_level(args.verbose, args.quiet, &config.logging.level);
    init_tracing(log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "starting tfo-mcp server");

    let proxy = match &config.claude.api_key {
        Some(api_key) => {
            match HttpClaudeClient::with_options(
                api_key,
                &config.claude.base_url,
                config.claude.timeout(),
            ) {
                Ok(client) => Some(
                    ClaudeProxy::new(Arc::new(client)).with_config(ProxyConfig {
                        max_retries: config.claude.max_retries,
                        retry_delay: config.claude.retry_delay(),
                        default_max_tokens: config.claude.max_tokens,
                        tool_loop_limit: config.claude.tool_loop_limit,
                    }),
                ),
                Err(e) => {
                    error!(error = %e, "failed to build Claude client");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => None,
    };

    let session = Arc::new(Session::new());
    let transport = Arc::new(StdioTransport::stdio());
    let dispatcher = Dispatcher::new(
        transport,
        session,
        DispatcherConfig {
            max_concurrent_requests: config.server.max_concurrent_requests,
            shutdown_grace: config.server.shutdown_grace(),
        },
    );

    {
        let proxy = proxy.clone();
        dispatcher.set_ready_hook(move |session| {
            seed_catalog(session, proxy.as_ref(), &config);
        });
    }

    info!("server ready, waiting for client");

    match dispatcher.serve().await {
        Ok(()) => {
            info!("server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "transport failure");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn log_level_resolution() {
        assert_eq!(get_log_level(0, true, "debug"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
        assert_eq!(get_log_level(1, false, "warn"), Level::INFO);
        assert_eq!(get_log_level(3, false, "warn"), Level::TRACE);
    }
}
