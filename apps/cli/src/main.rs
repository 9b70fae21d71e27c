use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use runpp_core::{sanitize_text, Document};
use runpp_highlight::{tokenize, ThemeRules};
use runpp_runexec::{SystemTerminal, ToolchainLocator, ToolchainSource};
use runpp_session::{CloseDisposition, EditorSession, Presenter, SessionEvent};
use runpp_settings::PreferencesStore;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "runpp",
    about = "Headless driver for the Run++ C++ editor core",
    author,
    version
)]
struct Cli {
    /// 指定工作區根目錄；預設為目前目錄。 / Workspace root holding `.runpp/preferences.json` (defaults to current directory).
    #[arg(long, global = true, value_name = "PATH")]
    workspace: Option<PathBuf>,
    /// 顯示除錯紀錄。 / Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 探測可用的 C++ 編譯器。 / Report which C++ compiler would be used.
    Probe(ProbeArgs),
    /// 輸出語法上色區段。 / Print the highlight tokens of a source file.
    Highlight(HighlightArgs),
    /// 移除不可見字元。 / Strip invisible Unicode characters from a file.
    Sanitize(SanitizeArgs),
    /// 編譯並執行。 / Compile a source file and run the program.
    Run(RunArgs),
}

#[derive(Args)]
struct ProbeArgs {
    /// 指定編譯器，略過自動探測。 / Compiler to use instead of the configured one.
    #[arg(long, value_name = "PATH")]
    compiler: Option<PathBuf>,
}

#[derive(Args)]
struct HighlightArgs {
    /// 來源檔案。 / Source file to tokenize.
    input: PathBuf,
    /// 佈景主題 JSON；預設使用設定或內建主題。 / Theme JSON; defaults to the configured or built-in theme.
    #[arg(long, value_name = "PATH")]
    theme: Option<PathBuf>,
    /// 以 JSON 陣列輸出。 / Emit a JSON array instead of text lines.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SanitizeArgs {
    /// 需要清理的檔案。 / Files to clean in place.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// 只檢查，不寫入；需要清理時回傳失敗。 / Only report; fail when any file would change.
    #[arg(long)]
    check: bool,
}

#[derive(Args)]
struct RunArgs {
    /// 來源檔案。 / Source file to compile and run.
    input: PathBuf,
    /// 語言標準版本，例如 17 或 c++20。 / Language standard such as `17` or `c++20`.
    #[arg(long = "std", value_name = "STANDARD")]
    standard: Option<String>,
    /// 指定編譯器。 / Compiler to use instead of the configured one.
    #[arg(long, value_name = "PATH")]
    compiler: Option<PathBuf>,
    /// 一律在外部終端機執行。 / Always launch the program in an external terminal.
    #[arg(long)]
    external: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let Cli {
        workspace, command, ..
    } = cli;
    let workspace_root = resolve_workspace(workspace)?;
    match command {
        Commands::Probe(args) => execute_probe(args, &workspace_root),
        Commands::Highlight(args) => execute_highlight(args, &workspace_root),
        Commands::Sanitize(args) => execute_sanitize(args),
        Commands::Run(args) => execute_run(args, &workspace_root),
    }
}

fn execute_probe(args: ProbeArgs, workspace_root: &Path) -> Result<i32> {
    let store = load_preferences(workspace_root)?;
    let compiler = args
        .compiler
        .or_else(|| store.preferences().build.compiler_override.clone());
    let invocation = ToolchainLocator::new()
        .with_override(compiler)
        .resolve()
        .context("probe for a C++ compiler")?;
    let source = match invocation.source() {
        ToolchainSource::Ambient => "PATH",
        ToolchainSource::Bundled => "bundled",
        ToolchainSource::Override => "configured",
    };
    println!("{} ({source})", invocation.compiler().display());
    Ok(0)
}

fn execute_highlight(args: HighlightArgs, workspace_root: &Path) -> Result<i32> {
    let text = fs::read_to_string(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;
    let theme_path = match args.theme {
        Some(path) => Some(path),
        None => load_preferences(workspace_root)?
            .preferences()
            .ui
            .theme_path
            .clone(),
    };
    let rules = match theme_path {
        Some(path) => ThemeRules::load_or_empty(path),
        None => ThemeRules::builtin(),
    };

    let tokens = tokenize(&text, &rules);
    if args.json {
        let items: Vec<_> = tokens
            .iter()
            .map(|token| {
                json!({
                    "start": token.range.start,
                    "end": token.range.end,
                    "kind": token.kind.style_key(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for token in &tokens {
            let snippet: String = text
                .chars()
                .skip(token.range.start)
                .take(token.range.len())
                .collect();
            println!(
                "{}..{}\t{}\t{}",
                token.range.start,
                token.range.end,
                token.kind.style_key(),
                snippet.escape_debug()
            );
        }
    }
    Ok(0)
}

fn execute_sanitize(args: SanitizeArgs) -> Result<i32> {
    let mut dirty = Vec::new();
    for input in &args.inputs {
        let text = fs::read_to_string(input)
            .with_context(|| format!("read {}", input.display()))?;
        let cleaned = sanitize_text(&text);
        if cleaned == text {
            continue;
        }
        if !args.check {
            fs::write(input, cleaned.as_bytes())
                .with_context(|| format!("write {}", input.display()))?;
            println!("Cleaned {}", input.display());
        }
        dirty.push(input);
    }

    if args.check && !dirty.is_empty() {
        for input in &dirty {
            println!("{} contains invisible characters", input.display());
        }
        return Ok(1);
    }
    Ok(0)
}

fn execute_run(args: RunArgs, workspace_root: &Path) -> Result<i32> {
    let mut store = load_preferences(workspace_root)?;
    let mut prefs = store.preferences().clone();
    if let Some(standard) = args.standard {
        prefs.build.language_standard = standard;
    }
    if let Some(compiler) = args.compiler {
        prefs.build.compiler_override = Some(compiler);
    }
    if args.external {
        prefs.build.always_external_terminal = true;
    }
    // Command-line overrides apply to this run only and are never saved.
    store = PreferencesStore::new(store.path().to_path_buf(), prefs);

    let mut session = EditorSession::new(
        store,
        ToolchainLocator::new(),
        Arc::new(SystemTerminal),
        ConsolePresenter::default(),
    );
    session
        .open(&args.input)
        .with_context(|| format!("open {}", args.input.display()))?;
    if session.run_active().is_err() {
        // ConsolePresenter has already printed the reason.
        return Ok(1);
    }

    while session.is_build_active() {
        thread::sleep(Duration::from_millis(15));
        session.tick(Instant::now());
    }
    session.tick(Instant::now());
    session.shutdown();

    let presenter = session.presenter();
    if presenter.compile_failed {
        bail!("compilation failed");
    }
    Ok(match presenter.outcome {
        RunOutcome::Exited(Some(code)) => code,
        RunOutcome::Exited(None) | RunOutcome::Failed => 1,
        RunOutcome::Pending => 0,
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    #[default]
    Pending,
    Exited(Option<i32>),
    Failed,
}

/// Streams program output to stdout and progress to stderr.
#[derive(Default)]
struct ConsolePresenter {
    compile_failed: bool,
    outcome: RunOutcome,
}

impl Presenter for ConsolePresenter {
    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Status(line) => eprintln!("{line}"),
            SessionEvent::Output(line) => println!("{line}"),
            SessionEvent::CompileFailed {
                exit_code,
                diagnostics,
            } => {
                eprint!("{diagnostics}");
                if let Some(code) = exit_code {
                    eprintln!("Compiler exited with code {code}");
                }
                self.compile_failed = true;
            }
            SessionEvent::ProgramExited { exit_code } => {
                self.outcome = RunOutcome::Exited(exit_code);
            }
            SessionEvent::Error(message) => {
                eprintln!("error: {message}");
                if self.outcome == RunOutcome::Pending {
                    self.outcome = RunOutcome::Failed;
                }
            }
            _ => {}
        }
    }

    fn confirm_close(&mut self, _document: &Document) -> CloseDisposition {
        CloseDisposition::Discard
    }

    fn request_save_path(&mut self, _document: &Document) -> Option<PathBuf> {
        None
    }
}

fn load_preferences(workspace_root: &Path) -> Result<PreferencesStore> {
    let path = preferences_path(workspace_root);
    PreferencesStore::load(&path).with_context(|| format!("load {}", path.display()))
}

fn preferences_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".runpp").join("preferences.json")
}

fn resolve_workspace(workspace: Option<PathBuf>) -> Result<PathBuf> {
    match workspace {
        Some(path) => {
            if path.is_absolute() {
                Ok(path)
            } else {
                Ok(std::env::current_dir()
                    .context("determine current directory")?
                    .join(path))
            }
        }
        None => std::env::current_dir().context("determine current directory"),
    }
}
