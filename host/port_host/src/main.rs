use clap::{Parser, ValueEnum};
use port_host_runtime::{
    FileStore, HostExit, ProcessApplication, Profile, Registry, SystemClipboard,
    max_frame_from_env,
};
use std::io;
use std::path::PathBuf;
use std::process::{self, Command};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    /// Single `apiUrl` endpoint
    TemplateEditor,
    /// `dswApiUrl` and `teApiUrl` endpoints plus a random seed
    Integrated,
}

impl ProfileArg {
    fn profile(self) -> Profile {
        match self {
            ProfileArg::TemplateEditor => Profile::template_editor(),
            ProfileArg::Integrated => Profile::integrated(),
        }
    }
}

#[derive(Parser)]
#[command(name = "port_host")]
#[command(about = "Runs an application and serves its session, clipboard and reload ports.")]
struct Args {
    /// Endpoint profile to resolve
    #[arg(long, value_enum, default_value = "template-editor")]
    profile: ProfileArg,

    /// JSON object file with endpoint overrides
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Inline JSON object with endpoint overrides, applied over --registry
    #[arg(long = "registry-json", env = "PORT_HOST_REGISTRY")]
    registry_json: Option<String>,

    /// Directory holding persisted host storage
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Application command and its arguments
    #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.debug);

    match run(&args) {
        Ok(HostExit::Closed) => {}
        Ok(HostExit::Reload) => {
            let err = reload_process();
            error!("failed to reload host: {err}");
            process::exit(1);
        }
        Err(err) => {
            error!("port_host fatal error: {err}");
            process::exit(1);
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "port_host={default_level},port_host_runtime={default_level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<HostExit, Box<dyn std::error::Error>> {
    let registry = load_registry(args);
    let store = FileStore::open(store_dir(args)?)?;
    info!(dir = %store.dir().display(), "using session storage");

    let (program, program_args) = args
        .command
        .split_first()
        .ok_or("missing application command")?;
    let mut command = Command::new(program);
    command.args(program_args);

    let application = ProcessApplication::new(command).with_max_frame(max_frame_from_env());
    let exit = port_host_runtime::run(
        application,
        &args.profile.profile(),
        &registry,
        store,
        SystemClipboard::new(),
    )?;

    Ok(exit)
}

fn load_registry(args: &Args) -> Registry {
    let from_file = match &args.registry {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(raw) => Registry::from_json(&raw),
            Err(err) => {
                warn!("failed to read registry {}: {err}; using defaults", path.display());
                Registry::empty()
            }
        },
        None => Registry::empty(),
    };

    let inline = args
        .registry_json
        .as_deref()
        .map(Registry::from_json)
        .unwrap_or_default();

    from_file.merged(inline)
}

fn store_dir(args: &Args) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(dir) = &args.store_dir {
        return Ok(dir.clone());
    }

    directories::ProjectDirs::from("", "", "port-host")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| "could not determine a data directory; pass --store-dir".into())
}

/// Replaces the current process with a fresh copy of itself. Only returns on
/// failure.
fn reload_process() -> io::Error {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(err) => return err,
    };
    let mut command = Command::new(exe);
    command.args(std::env::args_os().skip(1));
    info!("reloading host process");
    replace_process(command)
}

#[cfg(unix)]
fn replace_process(mut command: Command) -> io::Error {
    use std::os::unix::process::CommandExt;
    command.exec()
}

#[cfg(not(unix))]
fn replace_process(mut command: Command) -> io::Error {
    match command.status() {
        Ok(status) => process::exit(status.code().unwrap_or(1)),
        Err(err) => err,
    }
}
