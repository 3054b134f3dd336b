use std::cell::Cell;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use metarec_console::chat::{ChatBackend, ChatMessage};
use metarec_console::conversations::UserPreferencesUpdate;
use metarec_console::debug::{BehaviorTestRequest, TrackRequest, UnitRunRequest};
use metarec_console::dispatch::generate_input;
use metarec_console::polling::{Pollable, StatusTracker};
use metarec_console::view;
use metarec_console::{
    build_playground_command, dispatch, find_operation, find_operation_by_command,
    synthesize_input_schema, BackendClient, ChatSession, ClientError, ConfirmationAnswer,
    ConsoleConfig, Conversations, DebugConsole, InputMode, PlaygroundInput, PollLoop, PollOutcome, ReplyKind,
    TaskStatus,
};

#[derive(Parser)]
#[command(
    name = "metarec-console",
    version,
    about = "Terminal console for the MetaRec recommendation backend"
)]
struct Cli {
    /// Backend base URL (overrides METAREC_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// User id for chat and status calls (overrides METAREC_USER_ID)
    #[arg(long, global = true)]
    user_id: Option<String>,

    /// Stop polling after this many seconds (overrides METAREC_MAX_WAIT_SECS)
    #[arg(long, global = true)]
    max_wait: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the recommender interactively
    Chat {
        /// Continue an existing conversation and persist turns into it
        #[arg(long)]
        conversation: Option<String>,
        /// Create a new conversation and persist turns into it
        #[arg(long, conflicts_with = "conversation")]
        new_conversation: bool,
        /// Title for --new-conversation
        #[arg(long, requires = "new_conversation")]
        title: Option<String>,
        /// Let the backend use its online search agent
        #[arg(long)]
        online: bool,
        /// Stream text replies as they are generated
        #[arg(long)]
        stream: bool,
    },
    /// Show a recommendation task's status
    Status {
        task_id: String,
        #[arg(long)]
        conversation: Option<String>,
        /// Keep polling until the task finishes
        #[arg(long)]
        watch: bool,
    },
    /// List and manage stored conversations
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },
    /// Show or change recommendation preferences
    Preferences {
        #[command(subcommand)]
        action: PreferencesAction,
    },
    /// Admin debug console (needs METAREC_DEBUG_TOKEN or --token)
    Debug {
        /// Debug admin token (overrides METAREC_DEBUG_TOKEN)
        #[arg(long, global = true)]
        token: Option<String>,
        #[command(subcommand)]
        action: DebugAction,
    },
    /// Explore and call the backend's OpenAPI operations
    Api {
        /// Debug admin token, needed for --mode llm generation
        #[arg(long, global = true)]
        token: Option<String>,
        #[command(subcommand)]
        action: ApiAction,
    },
}

#[derive(Subcommand)]
enum ConversationAction {
    List,
    /// Print a conversation's saved messages
    Show { conversation_id: String },
    Rename {
        conversation_id: String,
        title: String,
    },
    Delete { conversation_id: String },
}

#[derive(Subcommand)]
enum PreferencesAction {
    /// Print user preferences, or a conversation's with --conversation
    Get {
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Update preferences from a JSON object. User-level updates take
    /// restaurantTypes, flavorProfiles, diningPurpose, budgetRange, location.
    Set {
        json: String,
        #[arg(long)]
        conversation: Option<String>,
    },
}

#[derive(Subcommand)]
enum DebugAction {
    /// Show the debug surface configuration
    Config,
    /// Check the token and print the session it creates
    Login,
    Logout,
    Session,
    /// List recent traced runs
    Runs,
    /// Show one traced run
    Run {
        run_id: String,
        /// Refresh until the run finishes
        #[arg(long)]
        watch: bool,
    },
    /// Start a behaviour test: one chat turn, traced end to end
    Behavior {
        query: String,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long)]
        online: bool,
        /// Stop at confirmation requests instead of confirming
        #[arg(long)]
        no_auto_confirm: bool,
        #[arg(long)]
        watch: bool,
    },
    /// Trace an existing recommendation task
    Track {
        task_id: String,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long)]
        watch: bool,
    },
    /// Ask the backend to explain a run's trace
    Explain { run_id: String },
    /// List registered units
    Units,
    /// Generate input for a unit
    UnitInput {
        unit: String,
        #[arg(long, default_value = "schema")]
        mode: InputMode,
    },
    /// Run a unit with manual (--input) or generated (--mode) input
    RunUnit {
        unit: String,
        /// Input object as JSON
        #[arg(long, conflicts_with = "mode")]
        input: Option<String>,
        #[arg(long)]
        mode: Option<InputMode>,
    },
}

#[derive(Subcommand)]
enum ApiAction {
    /// List operations from /openapi.json
    List,
    /// Show an operation's composite input schema
    Schema { method: String, path: String },
    /// Generate input for an operation
    Generate {
        method: String,
        path: String,
        #[arg(long, default_value = "schema")]
        mode: InputMode,
    },
    /// Call an operation: `api call <group> <operation> [args]`
    #[command(disable_help_flag = true)]
    Call {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("metarec_console=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let mut config = ConsoleConfig::from_env().context("invalid configuration")?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(user_id) = cli.user_id {
        config.user_id = user_id;
    }
    if let Some(secs) = cli.max_wait {
        config.max_wait = Some(Duration::from_secs(secs));
    }

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.base_url,
        user_id = %config.user_id,
        "starting metarec-console"
    );

    let client = BackendClient::new(&config).context("failed to create HTTP client")?;

    match cli.command {
        Commands::Chat {
            conversation,
            new_conversation,
            title,
            online,
            stream,
        } => {
            let conversations = Conversations::new(&client, &config.user_id);
            let session = if new_conversation {
                let created = conversations
                    .create(title.as_deref())
                    .context("failed to create conversation")?;
                println!("conversation {}", created.id);
                ChatSession::new(&config.user_id, Some(created.id))
            } else if let Some(id) = conversation {
                let stored = conversations
                    .get(&id)
                    .with_context(|| format!("failed to load conversation {id}"))?;
                println!("resuming \"{}\" ({} messages)", stored.title, stored.messages.len());
                ChatSession::resume(&config.user_id, &stored)
            } else {
                ChatSession::new(&config.user_id, None)
            };
            let session = session
                .with_online_agent(online || config.use_online_agent)
                .with_streaming(stream);
            run_chat(&client, &config, session)?;
        }
        Commands::Status {
            task_id,
            conversation,
            watch,
        } => show_status(&client, &config, &task_id, conversation.as_deref(), watch)?,
        Commands::Conversations { action } => run_conversations(&client, &config, action)?,
        Commands::Preferences { action } => run_preferences(&client, &config, action)?,
        Commands::Debug { token, action } => {
            if let Some(token) = token {
                config.debug_token = Some(token);
            }
            run_debug(&client, &config, action)?;
        }
        Commands::Api { token, action } => {
            if let Some(token) = token {
                config.debug_token = Some(token);
            }
            run_api(&client, &config, action)?;
        }
    }

    Ok(())
}

/// Print a command-scoped error line, plus a notice for unknown task ids.
fn report(err: &ClientError) {
    eprintln!("error: {err}");
    if err.is_task_not_found() {
        eprintln!("notice: the backend does not know this task id; it may have expired or belong to another user");
    }
}

fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn run_chat(client: &BackendClient, config: &ConsoleConfig, mut session: ChatSession) -> Result<()> {
    let poll = PollLoop::new(config.task_poll_interval).max_wait(config.max_wait);
    println!("MetaRec chat as {} (empty line or Ctrl-D to quit)", session.user_id());

    while let Some(line) = prompt("you> ")? {
        if line.is_empty() {
            break;
        }
        if let Err(err) = chat_turn(client, &mut session, &poll, &line) {
            report(&err);
        }
    }
    Ok(())
}

/// One user turn, answering confirmation requests until a terminal reply.
fn chat_turn(
    client: &BackendClient,
    session: &mut ChatSession,
    poll: &PollLoop,
    line: &str,
) -> Result<(), ClientError> {
    let streamed = Cell::new(false);
    let mut print_chunk = |chunk: &str| {
        if !streamed.replace(true) {
            print!("metarec> ");
        }
        print!("{chunk}");
        let _ = io::stdout().flush();
    };

    let mut kind = session.submit(client, line, &mut print_chunk)?;
    loop {
        match kind {
            ReplyKind::Text(reply) => {
                if streamed.get() {
                    println!();
                } else {
                    println!("metarec> {reply}");
                }
                return Ok(());
            }
            ReplyKind::Confirmation { request, guidance } => {
                print!("metarec> {}", view::render_confirmation(&request, guidance));
                let answer = match prompt("you> ") {
                    Ok(Some(answer)) => answer,
                    _ => return Ok(()),
                };
                let answer = match answer.to_ascii_lowercase().as_str() {
                    "y" | "yes" if !guidance => ConfirmationAnswer::Confirm,
                    "n" | "no" if !guidance => ConfirmationAnswer::Reject,
                    "" => return Ok(()),
                    _ => ConfirmationAnswer::Edit(answer),
                };
                kind = session.answer_confirmation(client, answer, &mut print_chunk)?;
            }
            ReplyKind::Task { task_id } => {
                tracing::debug!(%task_id, "tracking task");
                let outcome = session.track_task(client, &task_id, poll, |msg| {
                    print!("{}", view::render_message(msg));
                });
                match outcome {
                    PollOutcome::TimedOut(_) => {
                        println!("metarec> still working; check later with `status {task_id}`")
                    }
                    PollOutcome::Cancelled | PollOutcome::Superseded => {}
                    PollOutcome::Finished(_) => {}
                }
                return Ok(());
            }
            ReplyKind::Results(restaurants) => {
                print!("metarec> {}", view::render_recommendations(&restaurants));
                return Ok(());
            }
        }
    }
}

fn show_status(
    client: &BackendClient,
    config: &ConsoleConfig,
    task_id: &str,
    conversation: Option<&str>,
    watch: bool,
) -> Result<()> {
    let print_status = |status: &TaskStatus| {
        println!("{}", view::render_progress(Some(status.progress), &status.message));
    };

    let first = match client.task_status(task_id, &config.user_id, conversation) {
        Ok(status) => status,
        Err(err) => {
            report(&err);
            bail!("status lookup failed for task {task_id}");
        }
    };
    print_status(&first);

    let last = if watch && !first.is_terminal() {
        let poll = PollLoop::new(config.task_poll_interval).max_wait(config.max_wait);
        let mut tracker: StatusTracker<TaskStatus> = StatusTracker::new();
        let ticket = tracker.retarget(task_id);
        let outcome = poll.run(
            &mut tracker,
            &ticket,
            |id| client.task_status(id, &config.user_id, conversation),
            print_status,
        );
        match outcome {
            PollOutcome::Finished(status) => status,
            PollOutcome::TimedOut(_) => bail!("gave up waiting for task {task_id}"),
            PollOutcome::Cancelled | PollOutcome::Superseded => return Ok(()),
        }
    } else {
        first
    };

    if let Some(result) = last.result.as_ref().filter(|_| last.is_terminal()) {
        print!("{}", view::render_recommendations(&result.restaurants));
    }
    if let Some(error) = &last.error {
        println!("error: {error}");
    }
    Ok(())
}

fn run_conversations(
    client: &BackendClient,
    config: &ConsoleConfig,
    action: ConversationAction,
) -> Result<()> {
    let conversations = Conversations::new(client, &config.user_id);
    match action {
        ConversationAction::List => {
            for conversation in conversations.list()? {
                println!("{}", view::render_conversation_summary(&conversation));
            }
        }
        ConversationAction::Show { conversation_id } => {
            let stored = conversations.get(&conversation_id)?;
            println!("{} ({})", stored.title, stored.id);
            for message in &stored.messages {
                print!("{}", view::render_message(&ChatMessage::from_stored(message)));
            }
        }
        ConversationAction::Rename {
            conversation_id,
            title,
        } => {
            let renamed = conversations.rename(&conversation_id, &title)?;
            println!("renamed {} to \"{}\"", renamed.id, renamed.title);
        }
        ConversationAction::Delete { conversation_id } => {
            conversations.delete(&conversation_id)?;
            println!("deleted {conversation_id}");
        }
    }
    Ok(())
}

fn run_preferences(
    client: &BackendClient,
    config: &ConsoleConfig,
    action: PreferencesAction,
) -> Result<()> {
    let conversations = Conversations::new(client, &config.user_id);
    let preferences = match action {
        PreferencesAction::Get { conversation: Some(id) } => conversations.preferences(&id)?,
        PreferencesAction::Get { conversation: None } => conversations.user_preferences()?,
        PreferencesAction::Set { json, conversation } => {
            let value: Value = serde_json::from_str(&json).context("preferences are not valid JSON")?;
            if !value.is_object() {
                bail!("preferences must be a JSON object");
            }
            match conversation {
                Some(id) => conversations.set_preferences(&id, &value)?,
                None => {
                    let update: UserPreferencesUpdate = serde_json::from_value(value)
                        .context("invalid user preferences")?;
                    conversations.update_user_preferences(&update)?
                }
            }
        }
    };
    print_json(&preferences)
}

fn login_if_configured(console: &DebugConsole<'_>, config: &ConsoleConfig) -> Result<()> {
    if let Some(token) = &config.debug_token {
        console.login(token).context("debug login failed")?;
    }
    Ok(())
}

fn watch_run(console: &DebugConsole<'_>, config: &ConsoleConfig, run_id: &str) -> Result<()> {
    let poll = PollLoop::new(config.run_poll_interval).max_wait(config.max_wait);
    let mut printed = 0;
    let outcome = console.watch_run(run_id, &poll, |run| {
        for event in run.events.iter().skip(printed) {
            print!("{}", view::render_trace_event(event));
        }
        printed = run.events.len();
    });
    match outcome {
        PollOutcome::Finished(run) => {
            for event in run.events.iter().skip(printed) {
                print!("{}", view::render_trace_event(event));
            }
            println!("run {} finished: {}", run.id, run.status.as_str());
            if let Some(error) = &run.error {
                println!("error: {error}");
            }
        }
        PollOutcome::TimedOut(_) => println!("stopped watching run {run_id}"),
        PollOutcome::Cancelled | PollOutcome::Superseded => {}
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_validation(errors: &[String]) {
    for error in errors {
        println!("validation: {error}");
    }
}

fn run_debug(client: &BackendClient, config: &ConsoleConfig, action: DebugAction) -> Result<()> {
    let console = DebugConsole::new(client);

    match action {
        DebugAction::Config => {
            let cfg = console.config()?;
            println!(
                "enabled={} llm_explain={} auth={} cookie={}",
                cfg.enabled, cfg.llm_explain_enabled, cfg.auth_mode, cfg.cookie_name
            );
            return Ok(());
        }
        DebugAction::Login => {
            let token = config
                .debug_token
                .as_deref()
                .ok_or_else(|| anyhow!("no debug token (set METAREC_DEBUG_TOKEN or pass --token)"))?;
            let session = console.login(token)?;
            println!("session {} role={} expires {}", session.id, session.role, session.expires_at);
            return Ok(());
        }
        _ => login_if_configured(&console, config)?,
    }

    match action {
        DebugAction::Config | DebugAction::Login => {}
        DebugAction::Logout => {
            console.logout()?;
            println!("logged out");
        }
        DebugAction::Session => {
            let session = console.session()?;
            println!("session {} role={} expires {}", session.id, session.role, session.expires_at);
        }
        DebugAction::Runs => {
            for run in console.list_runs()? {
                println!("{}", view::render_run_summary(&run));
            }
        }
        DebugAction::Run { run_id, watch } => {
            if watch {
                watch_run(&console, config, &run_id)?;
            } else {
                print!("{}", view::render_run(&console.get_run(&run_id)?));
            }
        }
        DebugAction::Behavior {
            query,
            conversation,
            online,
            no_auto_confirm,
            watch,
        } => {
            let mut request = BehaviorTestRequest::new(query);
            request.conversation_id = conversation;
            request.use_online_agent = online || config.use_online_agent;
            request.auto_confirm = !no_auto_confirm;
            let started = console.start_behavior_test(&request)?;
            println!("run {} {}", started.run_id, started.status.as_str());
            if watch {
                watch_run(&console, config, &started.run_id)?;
            }
        }
        DebugAction::Track {
            task_id,
            conversation,
            watch,
        } => {
            let mut request = TrackRequest::new(task_id);
            request.user_id = Some(config.user_id.clone());
            request.conversation_id = conversation;
            let started = match console.track_task(&request) {
                Ok(started) => started,
                Err(err) => {
                    report(&err);
                    bail!("no tracking run created");
                }
            };
            println!("run {} {}", started.run_id, started.status.as_str());
            if watch {
                watch_run(&console, config, &started.run_id)?;
            }
        }
        DebugAction::Explain { run_id } => {
            let explanation = console.explain(&run_id)?;
            println!("{}", explanation.content);
            println!("({} ms)", explanation.duration_ms);
        }
        DebugAction::Units => {
            for unit in console.list_units()? {
                println!("{:<32} {}", unit.name, unit.description);
            }
        }
        DebugAction::UnitInput { unit, mode } => {
            let generated = console.generate_unit_input(&unit, mode)?;
            print_json(&generated.input_data)?;
            print_validation(&generated.validation_errors);
        }
        DebugAction::RunUnit { unit, input, mode } => {
            let request = match (input, mode) {
                (Some(text), _) => {
                    let data: Value =
                        serde_json::from_str(&text).context("--input is not valid JSON")?;
                    if !data.is_object() {
                        bail!("--input must be a JSON object");
                    }
                    UnitRunRequest::manual(unit, data)
                }
                (None, mode) => UnitRunRequest::generated(unit, mode.unwrap_or(InputMode::Sample)),
            };
            let resp = console.run_unit(&request)?;
            println!("input ({}):", serde_json::to_string(&resp.input_source)?);
            print_json(&resp.input_data)?;
            print_validation(&resp.validation_errors);
            print!("{}", view::render_unit_result(&resp.result));
        }
    }
    Ok(())
}

fn run_api(client: &BackendClient, config: &ConsoleConfig, action: ApiAction) -> Result<()> {
    let console = DebugConsole::new(client);
    let ops = console.operations().context("failed to load /openapi.json")?;

    match action {
        ApiAction::List => {
            for op in &ops {
                println!("{}", view::render_operation(op));
            }
        }
        ApiAction::Schema { method, path } => {
            let op = find_operation(&ops, &method, &path)
                .ok_or_else(|| anyhow!("no operation {} {path}", method.to_uppercase()))?;
            let schema = synthesize_input_schema(op);
            print!("{}", view::render_form(&schema));
            print_json(&schema)?;
        }
        ApiAction::Generate { method, path, mode } => {
            let op = find_operation(&ops, &method, &path)
                .ok_or_else(|| anyhow!("no operation {} {path}", method.to_uppercase()))?;
            if mode == InputMode::Llm {
                login_if_configured(&console, config)?;
            }
            let generated = generate_input(op, mode, &console)?;
            print_json(&generated.raw)?;
            print_validation(&generated.validation_errors);
        }
        ApiAction::Call { args } => {
            let argv = std::iter::once("call".to_string()).chain(args);
            let matches = build_playground_command(&ops).get_matches_from(argv);
            let (group, group_matches) = matches
                .subcommand()
                .ok_or_else(|| anyhow!("missing operation group"))?;
            let (name, op_matches) = group_matches
                .subcommand()
                .ok_or_else(|| anyhow!("missing operation"))?;
            let op = find_operation_by_command(&ops, group, name)
                .ok_or_else(|| anyhow!("unknown operation {group} {name}"))?;

            let mut input = PlaygroundInput::default();
            if let Some(mode) = op_matches.get_one::<String>("generate") {
                let mode: InputMode = mode.parse().map_err(|e: String| anyhow!(e))?;
                if mode == InputMode::Llm {
                    login_if_configured(&console, config)?;
                }
                let generated = generate_input(op, mode, &console)?;
                print_validation(&generated.validation_errors);
                input = generated.input;
            }
            input.overlay(PlaygroundInput::from_matches(op, op_matches)?);

            let started = std::time::Instant::now();
            let result = dispatch(client, op, &input)
                .with_context(|| format!("{} failed", op.label()))?;
            tracing::info!(op = %op.label(), elapsed_ms = started.elapsed().as_millis() as u64, "call finished");
            print_json(&result)?;
        }
    }
    Ok(())
}
