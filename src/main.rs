use clap::{Parser, ValueEnum};
use rustyline::history::MemHistory;
use rustyline::Editor;
use signal_hook::consts::SIGWINCH;
use termion::cursor::HideCursor;
use termion::event::Event as TermionEvent;
use termion::input::{MouseTerminal, TermRead};
use termion::raw::IntoRawMode;
use termion::screen::IntoAlternateScreen;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use std::io::{self, IsTerminal, Read};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Condvar, Mutex, PoisonError};
use std::thread;

use fview::app::{App, STATUS_ROWS};
use fview::config::{EncodingName, ViewConfig};
use fview::dimensions;
use fview::pipe::spawn_reader;
use fview::terminal::TtyInterrupt;
use fview::view::{Input, View};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EncodingArg {
    #[value(name = "utf-8", alias = "utf8")]
    Utf8,
    #[value(name = "latin1", alias = "iso-8859-1")]
    Latin1,
}

/// A terminal pager for files and command output.
#[derive(Debug, Parser)]
#[command(name = "fview", version, about)]
struct Args {
    /// File to view. Reads stdin when missing or "-".
    file: Option<PathBuf>,

    /// View the output of a shell command instead of a file.
    #[arg(short, long, conflicts_with = "file")]
    command: Option<String>,

    /// Line to start at (1-based).
    #[arg(short = 'n', long, default_value_t = 0)]
    line: u64,

    /// Scroll long lines sideways instead of wrapping them.
    #[arg(long)]
    no_wrap: bool,

    /// Show backspace overprinting as bold and underline.
    #[arg(long)]
    nroff: bool,

    #[arg(long)]
    tab_spacing: Option<u64>,

    #[arg(long, value_enum)]
    encoding: Option<EncodingArg>,

    /// Config file to use instead of the discovered fview.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a debug log (fview.log) into this directory. Filter with RUST_LOG.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let _log_guard = args.log_dir.as_deref().and_then(configure_logging);
    install_panic_hook();

    match run(args) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(err) => {
            error!(target: "app", error = %err, "exiting");
            eprintln!("fview: {err}");
            std::process::exit(1);
        }
    }
}

fn configure_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(log_dir, "fview.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()
        .map(|()| guard)
}

fn install_panic_hook() {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(target: "app", %info, "panic");
        default_panic(info);
    }));
}

fn view_config(args: &Args) -> ViewConfig {
    let mut config = match ViewConfig::load_from(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            warn!(target: "config", error = %err, "ignoring config file");
            eprintln!("fview: {err}; using defaults");
            ViewConfig::default()
        }
    };

    if args.no_wrap {
        config.wrap = false;
    }
    if args.nroff {
        config.nroff = true;
    }
    if let Some(tab_spacing) = args.tab_spacing.filter(|n| *n > 0) {
        config.tab_spacing = tab_spacing;
    }
    match args.encoding {
        Some(EncodingArg::Utf8) => config.encoding = EncodingName::Utf8,
        Some(EncodingArg::Latin1) => config.encoding = EncodingName::Latin1,
        None => {}
    }
    config
}

fn run(args: Args) -> io::Result<i32> {
    let (app_input_events_sender, app_input_events_receiver) = mpsc::channel();
    let config = view_config(&args);

    let terminal_dimensions = dimensions::current()?;
    let mut view = View::new(&config, terminal_dimensions.without_rows(STATUS_ROWS));

    // Data from stdin or a command is read on its own thread, which wakes the
    // app up whenever more arrives.
    let data_sender = app_input_events_sender.clone();
    let notify = move || {
        let _ = data_sender.send(AppInputEvent::DataAvailable);
    };

    let mut child: Option<Child> = None;
    let (input, name) = match (&args.command, &args.file) {
        (Some(command), _) => {
            let mut spawned = Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()?;
            let stdout = spawned
                .stdout
                .take()
                .ok_or_else(|| io::Error::other("command has no stdout"))?;
            child = Some(spawned);
            (
                Input::Pipe(Box::new(spawn_reader(Box::new(stdout), notify))),
                command.clone(),
            )
        }
        (None, Some(file)) if file.as_os_str() != "-" => {
            (Input::Path(file.clone()), file.display().to_string())
        }
        _ => {
            if io::stdin().is_terminal() {
                eprintln!("Missing filename (\"fview --help\" for help)");
                return Ok(1);
            }
            (
                Input::Pipe(Box::new(spawn_reader(Box::new(io::stdin()), notify))),
                "(stdin)".to_string(),
            )
        }
    };

    if let Err(err) = view.load(input, args.line, None) {
        eprintln!("fview: {err}");
        return Ok(1);
    }
    info!(target: "app", name = name.as_str(), "viewing");

    let mut exit_code = 0;

    // Introduce scope to ensure [stdout] gets dropped, and terminal attributes are
    // restored.
    {
        let stdout = io::stdout();
        // Enable raw mode, switch to alternate screen, hide the cursor, and enable mouse input.
        let stdout = stdout.into_raw_mode()?;
        let stdout = stdout.into_alternate_screen()?;
        let stdout = HideCursor::from(stdout);
        let stdout = MouseTerminal::from(stdout);
        let stdout: Box<dyn std::io::Write> = Box::new(stdout);

        let editor_config = rustyline::config::Config::builder()
            .keyseq_timeout(Some(0))
            .behavior(rustyline::Behavior::PreferTerm)
            .build();

        let mut editor: Editor<(), MemHistory> =
            Editor::with_history(editor_config, MemHistory::new()).map_err(io::Error::other)?;

        editor.bind_sequence(
            rustyline::KeyEvent::new('\x1B', rustyline::Modifiers::empty()),
            rustyline::Cmd::Interrupt,
        );

        // The TTY thread shouldn't be trying to read input while we're processing
        // the previous bit of input; if the app wants to get user input via rustyline,
        // then two separate threads will be reading from the same input stream,
        // and they'll each see every other input. The TTY thread waits on this
        // flag after each event until the app thread is done with it.
        let should_get_tty_input_mutex = Arc::new(Mutex::new(true));
        let should_get_tty_input_condvar = Arc::new(Condvar::new());

        register_sigwinch_handler(app_input_events_sender.clone())?;
        get_tty_input(
            app_input_events_sender.clone(),
            should_get_tty_input_mutex.clone(),
            should_get_tty_input_condvar.clone(),
        )?;
        drop(app_input_events_sender);

        let mut app = App::new(view, name, editor, terminal_dimensions, stdout);
        match TtyInterrupt::open() {
            Ok(interrupt) => app.watch_for_interrupts(interrupt),
            Err(err) => warn!(target: "app", error = %err, "searches cannot be interrupted"),
        }
        app.draw_screen();

        loop {
            let app_input_event = app_input_events_receiver.recv();

            let got_tty_event = matches!(
                &app_input_event,
                Ok(AppInputEvent::TTYEvent(_) | AppInputEvent::TTYError(_)),
            );

            match app_input_event {
                Ok(AppInputEvent::Sigwinch) => match dimensions::current() {
                    Ok(dimensions) => app.handle_window_resize(dimensions),
                    Err(err) => warn!(target: "app", error = %err, "unable to get terminal size"),
                },
                Ok(AppInputEvent::TTYEvent(event)) => {
                    if app.handle_tty_event(event).is_some() {
                        break;
                    }
                }
                Ok(AppInputEvent::TTYError(io_error)) => app.handle_tty_input_error(io_error),
                Ok(AppInputEvent::DataAvailable) => app.handle_data_available(),
                Err(mpsc::RecvError) => {
                    // Every sender is owned by a thread that only exits when
                    // the app stops listening, so this shouldn't happen.
                    error!(target: "app", "app input events channel closed");
                    exit_code = 1;
                    break;
                }
            }

            // If we got a TTY event (or error), tell the TTY thread it can get more
            // input. (If we got a different kind of event, that means it's already
            // waiting for input.)
            if got_tty_event {
                *should_get_tty_input_mutex
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = true;
                should_get_tty_input_condvar.notify_one();
            }
        }
    }

    if let Some(mut child) = child {
        let _ = child.kill();
        let _ = child.wait();
    }

    Ok(exit_code)
}

enum AppInputEvent {
    Sigwinch,
    TTYEvent(TermionEvent),
    TTYError(io::Error),
    DataAvailable,
}

fn register_sigwinch_handler(sender: mpsc::Sender<AppInputEvent>) -> io::Result<()> {
    let (mut sigwinch_read, sigwinch_write) = UnixStream::pair()?;

    // NOTE: This overrides the SIGWINCH handler registered by rustyline.
    // It seems to only be used to handle line wrapping in the prompt.
    let _signal_id = signal_hook::low_level::pipe::register(SIGWINCH, sigwinch_write)?;

    thread::spawn(move || {
        // [signal_hook] sends a single byte every time it receives the signal;
        // we read it into this dummy buffer.
        let mut buf = [0];
        loop {
            // Ignore return error; it's safe to send extra [Sigwinch] events to
            // the app.
            let _ = sigwinch_read.read_exact(&mut buf);

            if sender.send(AppInputEvent::Sigwinch).is_err() {
                // The receiver has exited, there's no point in sending more.
                break;
            }
        }
    });
    Ok(())
}

fn get_tty_input(
    sender: mpsc::Sender<AppInputEvent>,
    should_get_tty_input_mutex: Arc<Mutex<bool>>,
    should_get_tty_input_condvar: Arc<Condvar>,
) -> io::Result<()> {
    let mut tty_events = termion::get_tty()?.events();

    thread::spawn(move || {
        let mut should_get_tty_input = should_get_tty_input_mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if *should_get_tty_input {
                *should_get_tty_input = false;

                let send_result = match tty_events.next() {
                    None => break,
                    Some(Ok(event)) => sender.send(AppInputEvent::TTYEvent(event)),
                    Some(Err(error)) => sender.send(AppInputEvent::TTYError(error)),
                };

                if send_result.is_err() {
                    break;
                }
            }

            should_get_tty_input = should_get_tty_input_condvar
                .wait_while(should_get_tty_input, |should_get| !*should_get)
                .unwrap_or_else(PoisonError::into_inner);
        }
    });
    Ok(())
}
