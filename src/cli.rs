use crate::{
    activity::LogRecord,
    catalog::{LibraryCatalog, ModCatalog},
    config::AppConfig,
    controller::{Command, ModController},
    library::Mod,
    logger, view,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct GlobalOptions {
    format: Option<OutputFormat>,
    library: Option<PathBuf>,
}

#[derive(Debug)]
enum CliAction {
    Help,
    Version,
    Command {
        command: CliCommand,
        format: OutputFormat,
        library: Option<PathBuf>,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Mods { filter: Option<String> },
    Profiles,
    Info(String),
    Log,
    Run(Option<PathBuf>),
}

/// One line of a `run` script.
#[derive(Debug, PartialEq, Eq)]
enum Intent {
    Command(Command),
    Apply,
    Show,
    Log(String),
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args)? {
        CliAction::Help => {
            print_help();
            Ok(())
        }
        CliAction::Version => {
            println!("modshell v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Command {
            command,
            format,
            library,
        } => {
            let config = AppConfig::load_or_create()?;
            logger::init(config.level_filter(), config.log_path())?;
            let library_dir = library.unwrap_or_else(|| config.library_dir.clone());
            let catalog = LibraryCatalog::open(&library_dir)?;
            log::debug!("Using library {}", catalog.data_dir().display());
            let mut controller = ModController::from_catalog(&catalog)?;
            logger::set_sender(controller.attach_log_channel());
            controller.pump_logs();
            let log_path = config.log_path();
            run_command(&mut controller, &catalog, command, format, log_path.as_deref())
        }
    }
}

fn parse_args(args: &[String]) -> Result<CliAction> {
    if matches!(args.first().map(|s| s.as_str()), Some("--help" | "-h" | "help")) {
        return Ok(CliAction::Help);
    }
    if matches!(args.first().map(|s| s.as_str()), Some("--version" | "-V" | "version")) {
        return Ok(CliAction::Version);
    }

    let (global, tokens) = parse_global_options(args)?;
    if tokens.iter().any(|token| token == "--help" || token == "-h") {
        return Ok(CliAction::Help);
    }
    let command = parse_subcommand(&tokens)?;
    Ok(CliAction::Command {
        command,
        format: global.format.unwrap_or(OutputFormat::Text),
        library: global.library,
    })
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut global = GlobalOptions::default();
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            global.format = Some(parse_format(value)?);
            continue;
        }
        if arg == "--format" {
            let value = iter.next().ok_or_else(|| anyhow!("--format requires a value"))?;
            global.format = Some(parse_format(value)?);
            continue;
        }
        if let Some(value) = arg.strip_prefix("--library=") {
            global.library = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--library" {
            let value = iter
                .next()
                .ok_or_else(|| anyhow!("--library requires a directory"))?;
            global.library = Some(PathBuf::from(value));
            continue;
        }
        tokens.push(arg.to_string());
    }

    Ok((global, tokens))
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value).ok_or_else(|| anyhow!("Unknown format: {value} (use 'text' or 'json')"))
}

fn parse_subcommand(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Mods { filter: None });
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    match head.as_str() {
        "mods" => parse_mods_list(rest),
        "profiles" => Ok(CliCommand::Profiles),
        "info" => {
            let query = rest
                .first()
                .ok_or_else(|| anyhow!("info requires a mod index or hash"))?;
            Ok(CliCommand::Info(query.to_string()))
        }
        "log" => Ok(CliCommand::Log),
        "run" => Ok(CliCommand::Run(rest.first().map(PathBuf::from))),
        other => bail!("Unknown command: {other} (see --help)"),
    }
}

fn parse_mods_list(args: &[String]) -> Result<CliCommand> {
    let mut filter = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "list" => {}
            "--filter" => {
                if let Some(value) = iter.next() {
                    filter = Some(value.to_string());
                } else {
                    bail!("--filter requires a value");
                }
            }
            value if value.starts_with("--filter=") => {
                filter = Some(value.trim_start_matches("--filter=").to_string());
            }
            other => bail!("Unknown mods option: {other}"),
        }
    }
    Ok(CliCommand::Mods { filter })
}

fn run_command(
    controller: &mut ModController,
    catalog: &dyn ModCatalog,
    command: CliCommand,
    format: OutputFormat,
    log_path: Option<&Path>,
) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match command {
        CliCommand::Mods { filter } => print_mods(controller, filter.as_deref(), format, &mut stdout),
        CliCommand::Profiles => print_profiles(controller, format, &mut stdout),
        CliCommand::Info(query) => print_info(controller, catalog, &query, format, &mut stdout),
        CliCommand::Log => print_log(controller, log_path, format, &mut stdout),
        CliCommand::Run(script) => {
            let input: Box<dyn BufRead> = match &script {
                Some(path) => Box::new(BufReader::new(
                    fs::File::open(path)
                        .with_context(|| format!("open script {}", path.display()))?,
                )),
                None => Box::new(io::stdin().lock()),
            };
            let summary = run_script(controller, catalog, input, format, &mut stdout)?;
            if controller.is_dirty() {
                log::warn!("Exiting with unapplied changes; they were not saved");
                controller.pump_logs();
            }
            if summary.failed > 0 {
                bail!("{} of {} intent(s) failed", summary.failed, summary.ran);
            }
            Ok(())
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ScriptSummary {
    ran: usize,
    failed: usize,
}

/// Runs intents line by line. A failing intent is reported on stderr and the script goes on.
fn run_script(
    controller: &mut ModController,
    catalog: &dyn ModCatalog,
    input: impl BufRead,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<ScriptSummary> {
    let mut summary = ScriptSummary::default();
    for (number, line) in input.lines().enumerate() {
        let line = line.context("read script line")?;
        let result = match parse_intent(&line) {
            Ok(Some(intent)) => {
                summary.ran += 1;
                execute_intent(controller, catalog, intent, format, out)
            }
            Ok(None) => continue,
            Err(err) => {
                summary.ran += 1;
                Err(err)
            }
        };
        if let Err(err) = result {
            summary.failed += 1;
            eprintln!("error: line {}: {err:#}", number + 1);
        }
        controller.pump_logs();
    }
    Ok(summary)
}

fn parse_intent(line: &str) -> Result<Option<Intent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let intent = match (verb, args.as_slice()) {
        ("toggle", [hash]) => Intent::Command(Command::Toggle {
            hash: hash.to_string(),
        }),
        ("option", [hash, option]) => Intent::Command(Command::ToggleOption {
            hash: hash.to_string(),
            option: option.to_string(),
        }),
        ("reorder", [indices, target]) => Intent::Command(Command::Reorder {
            indices: parse_index_list(indices)?,
            target: parse_index(target)?,
        }),
        ("select", ["none"]) => Intent::Command(Command::Select { index: None }),
        ("select", [index]) => Intent::Command(Command::Select {
            index: Some(parse_index(index)?),
        }),
        ("also", [index]) => Intent::Command(Command::SelectAlso {
            index: parse_index(index)?,
        }),
        ("deselect", [index]) => Intent::Command(Command::Deselect {
            index: parse_index(index)?,
        }),
        ("clear", []) => Intent::Command(Command::ClearSelection),
        ("move", [target]) => Intent::Command(Command::MoveSelected {
            target: parse_index(target)?,
        }),
        ("apply", []) => Intent::Apply,
        ("show", []) => Intent::Show,
        ("log", _) if !rest.is_empty() => Intent::Log(rest.to_string()),
        (
            "toggle" | "option" | "reorder" | "select" | "also" | "deselect" | "clear" | "move"
            | "apply" | "show" | "log",
            _,
        ) => bail!("Wrong arguments for {verb}: {line}"),
        _ => bail!("Unknown intent: {verb}"),
    };
    Ok(Some(intent))
}

fn parse_index(value: &str) -> Result<usize> {
    value
        .parse()
        .with_context(|| format!("Not a mod index: {value}"))
}

fn parse_index_list(value: &str) -> Result<Vec<usize>> {
    value
        .split(',')
        .filter(|part| !part.is_empty())
        .map(parse_index)
        .collect()
}

fn execute_intent(
    controller: &mut ModController,
    catalog: &dyn ModCatalog,
    intent: Intent,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    match intent {
        Intent::Command(command) => controller.dispatch(command)?,
        Intent::Apply => controller.apply(catalog)?,
        Intent::Show => {
            controller.pump_logs();
            print_state(controller, format, out)?;
        }
        Intent::Log(message) => log::info!("{message}"),
    }
    Ok(())
}

#[derive(Serialize)]
struct ModListItem<'a> {
    index: usize,
    hash: &'a str,
    name: &'a str,
    version: String,
    category: &'a str,
    enabled: bool,
    selected: bool,
}

fn print_mods(
    controller: &ModController,
    filter: Option<&str>,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let snapshot = controller.snapshot();
    match format {
        OutputFormat::Json => {
            let needle = filter.map(str::to_ascii_lowercase);
            let items: Vec<ModListItem> = snapshot
                .mods
                .iter()
                .enumerate()
                .filter(|(_, mod_)| {
                    needle
                        .as_deref()
                        .map_or(true, |needle| mod_.name().to_ascii_lowercase().contains(needle))
                })
                .map(|(index, mod_)| ModListItem {
                    index,
                    hash: &mod_.hash,
                    name: mod_.name(),
                    version: mod_.meta.version_label(),
                    category: &mod_.meta.category,
                    enabled: mod_.enabled,
                    selected: snapshot.selection.contains(&index),
                })
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&items)?)?;
        }
        OutputFormat::Text => {
            writeln!(out, "{}", view::toolbar(&snapshot))?;
            for line in view::mod_lines(&snapshot, filter) {
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ProfileListItem<'a> {
    name: &'a str,
    active: bool,
}

fn print_profiles(controller: &ModController, format: OutputFormat, out: &mut impl Write) -> Result<()> {
    let snapshot = controller.snapshot();
    match format {
        OutputFormat::Json => {
            let items: Vec<ProfileListItem> = snapshot
                .profiles
                .iter()
                .map(|profile| ProfileListItem {
                    name: &profile.name,
                    active: profile.name == snapshot.current_profile,
                })
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&items)?)?;
        }
        OutputFormat::Text => {
            for line in view::profile_lines(&snapshot) {
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}

/// A hash match wins over reading the query as an index.
fn resolve_mod(controller: &ModController, query: &str) -> Result<usize> {
    controller
        .position(query)
        .or_else(|| query.parse::<usize>().ok())
        .ok_or_else(|| anyhow!("No mod matches {query}"))
}

fn print_info(
    controller: &mut ModController,
    catalog: &dyn ModCatalog,
    query: &str,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let index = resolve_mod(controller, query)?;
    controller.select(Some(index))?;
    let mod_ = controller
        .selected_mod()
        .ok_or_else(|| anyhow!("No mod selected"))?;
    let preview = catalog.preview_artifact(&mod_.hash);

    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct InfoOutput<'a> {
                index: usize,
                #[serde(rename = "mod")]
                mod_: &'a Mod,
                preview: Option<PathBuf>,
            }
            let output = InfoOutput {
                index,
                mod_,
                preview,
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
        }
        OutputFormat::Text => {
            for line in view::info_lines(mod_, preview.as_deref()) {
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}

/// Prints the log file when there is one, otherwise this session's records.
fn print_log(
    controller: &mut ModController,
    log_path: Option<&Path>,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let records = match log_path.filter(|path| path.exists()) {
        Some(path) => read_log_file(path)?,
        None => {
            controller.pump_logs();
            controller.log().snapshot()
        }
    };
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?,
        OutputFormat::Text => {
            for line in view::log_lines(&records) {
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}

fn read_log_file(path: &Path) -> Result<Vec<LogRecord>> {
    let raw = fs::read_to_string(path).context("read log file")?;
    let mut records: Vec<LogRecord> = Vec::new();
    for line in raw.lines() {
        match LogRecord::parse_line(line) {
            Some(record) => records.push(record),
            // Multi-line messages continue the previous record.
            None => {
                if let Some(last) = records.last_mut() {
                    last.message.push('\n');
                    last.message.push_str(line);
                }
            }
        }
    }
    Ok(records)
}

fn print_state(controller: &ModController, format: OutputFormat, out: &mut impl Write) -> Result<()> {
    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(&controller.snapshot())?)?;
            Ok(())
        }
        OutputFormat::Text => print_mods(controller, None, format, out),
    }
}

fn print_help() {
    println!("modshell v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  modshell                        List mods (same as 'mods')");
    println!("  modshell mods [--filter <text>] List mods in load order");
    println!("  modshell profiles               List profiles");
    println!("  modshell info <index|hash>      Show details for one mod");
    println!("  modshell log                    Show the activity log file");
    println!("  modshell run [script]           Run intents from a file or stdin");
    println!();
    println!("Global options:");
    println!("  --library <dir>                 Library directory for this run");
    println!("  --format <json|text>            Output format");
    println!("  -h, --help                      Show help");
    println!("  -V, --version                   Show version");
    println!();
    println!("Intents (one per line, '#' starts a comment):");
    println!("  toggle <hash>                   Enable or disable a mod");
    println!("  option <hash> <name>            Enable or disable a mod option");
    println!("  reorder <i,j,...> <target>      Move mods as a block to a position");
    println!("  select <index|none>             Select one mod or nothing");
    println!("  also <index>                    Add a mod to the selection");
    println!("  deselect <index>                Remove a mod from the selection");
    println!("  clear                           Clear the selection");
    println!("  move <target>                   Move the selected mods to a position");
    println!("  apply                           Save pending changes to the library");
    println!("  show                            Print the current state");
    println!("  log <message>                   Add a message to the activity log");
}
