/// Serial drive console: terminal session, disk server and operator menu

use clap::{Parser, ValueEnum};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use log::{error, LevelFilter};
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, DefaultEditor, Editor, Helper};
use serialdrive::{
    create_blank, Direction, DriveTable, FilePicker, Keystroke, Link, Relay, Session,
    TransferService, Xmodem, IMAGE_SIZE, MENU_KEY,
};
use serialport::{DataBits, FlowControl, SerialPort, StopBits};
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Image mounted as drive 0 when no `--mount` is given
const DEFAULT_IMAGE: &str = "serialcpm.dsk";

/// Serial boot loader tape sent by `sendsbl`
const BOOT_LOADER: &str = "sbl.tap";

/// Serial read timeout; the reader just polls again
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait for a keystroke before re-checking for an active transfer
const INPUT_POLL: Duration = Duration::from_millis(100);

/// Sleep while a transfer owns the console
const SUSPEND_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ParityArg {
    #[value(name = "N")]
    None,
    #[value(name = "E")]
    Even,
    #[value(name = "O")]
    Odd,
}

/// Disk-over-serial agent for Altair 8800 CP/M 2.2
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Serial port name
    port: String,

    /// Baud rate
    #[arg(default_value_t = 19200)]
    baudrate: u32,

    /// Suppress non-error messages
    #[arg(short, long)]
    quiet: bool,

    /// Echo typed characters locally
    #[arg(short, long)]
    localecho: bool,

    /// Mount an image, e.g. `--mount 1=games.dsk` (repeatable)
    #[arg(short, long = "mount", value_name = "SLOT=PATH", value_parser = parse_mount)]
    mounts: Vec<(u8, PathBuf)>,

    /// Data bits
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(5..=8))]
    bytesize: u8,

    /// Parity
    #[arg(long, value_enum, ignore_case = true, default_value = "N")]
    parity: ParityArg,

    /// Stop bits
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    stopbits: u8,

    /// Enable RTS/CTS flow control
    #[arg(long)]
    rtscts: bool,

    /// Enable software flow control
    #[arg(long)]
    xonxoff: bool,

    /// Initial RTS line state
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    rts: Option<u8>,

    /// Initial DTR line state
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    dtr: Option<u8>,
}

fn parse_mount(s: &str) -> Result<(u8, PathBuf), String> {
    let (slot, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=PATH, got '{}'", s))?;
    let slot = slot
        .trim()
        .parse::<u8>()
        .map_err(|_| format!("invalid drive number '{}'", slot))?;
    Ok((slot, PathBuf::from(path)))
}

/// Raw terminal for the session; restored on drop
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Line-mode terminal for prompts; raw mode comes back on drop
struct CookedMode;

impl CookedMode {
    fn enter() -> io::Result<Self> {
        terminal::disable_raw_mode()?;
        Ok(CookedMode)
    }
}

impl Drop for CookedMode {
    fn drop(&mut self) {
        let _ = terminal::enable_raw_mode();
    }
}

/// Asks the operator for a transfer file name
struct ConsolePicker;

impl FilePicker for ConsolePicker {
    fn pick(&self, direction: Direction) -> Option<PathBuf> {
        let _cooked = CookedMode::enter().ok()?;
        let mut editor = DefaultEditor::new().ok()?;
        let prompt = match direction {
            Direction::Receive => "Receive into file (empty cancels)? ",
            Direction::Send => "File to send (empty cancels)? ",
        };
        match editor.readline(prompt) {
            Ok(line) if !line.trim().is_empty() => Some(PathBuf::from(line.trim())),
            _ => None,
        }
    }
}

/// Menu command names, for completion
const MENU_COMMANDS: &[&str] = &[
    "debug", "help", "list", "mkdisk", "mount", "quit", "sendfile", "sendgs", "sendsbl",
    "umount", "xget", "xsend",
];

/// Menu history file in the home directory
const HISTORY_FILE: &str = ".serialdrive_history";

/// Completes command names, then image and file paths for commands that take them
struct MenuHelper {
    files: FilenameCompleter,
}

impl MenuHelper {
    fn new() -> Self {
        Self {
            files: FilenameCompleter::new(),
        }
    }

    /// Word index of the argument that names a file, if any
    fn file_argument(command: &str) -> Option<usize> {
        match command {
            "mount" => Some(2),
            "mkdisk" | "sendfile" => Some(1),
            _ => None,
        }
    }
}

impl Completer for MenuHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let head = &line[..pos];
        let words: Vec<&str> = head.split_whitespace().collect();
        let typing_new_word = head.ends_with(char::is_whitespace);

        match (words.first(), words.len(), typing_new_word) {
            (None, _, _) | (Some(_), 1, false) => {
                let word = words.first().copied().unwrap_or("");
                let start = pos - word.len();
                let prefix = word.to_lowercase();
                let matches = MENU_COMMANDS
                    .iter()
                    .filter(|name| name.starts_with(&prefix))
                    .map(|name| Pair {
                        display: name.to_string(),
                        replacement: name.to_string(),
                    })
                    .collect();
                Ok((start, matches))
            }
            (Some(command), count, _) => {
                let index = if typing_new_word { count } else { count - 1 };
                match Self::file_argument(&command.to_lowercase()) {
                    Some(wanted) if wanted == index => self.files.complete_path(line, pos),
                    _ => Ok((pos, Vec::new())),
                }
            }
        }
    }
}

impl Hinter for MenuHelper {
    type Hint = String;
}

impl Highlighter for MenuHelper {}
impl Validator for MenuHelper {}
impl Helper for MenuHelper {}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}

#[derive(Debug, PartialEq, Eq)]
enum MenuExit {
    Resume,
    Quit,
}

/// Operator menu opened with Ctrl-]
struct Menu {
    link: Arc<Link>,
    relay: Relay,
    transfers: TransferService,
    editor: Editor<MenuHelper, DefaultHistory>,
}

impl Menu {
    fn new(link: Arc<Link>, relay: Relay, transfers: TransferService) -> rustyline::Result<Self> {
        let mut editor = Editor::new()?;
        editor.set_helper(Some(MenuHelper::new()));
        if let Some(history_path) = history_path() {
            let _ = editor.load_history(&history_path);
        }
        Ok(Self {
            link,
            relay,
            transfers,
            editor,
        })
    }

    fn save_history(&mut self) {
        if let Some(history_path) = history_path() {
            let _ = self.editor.save_history(&history_path);
        }
    }

    fn run(&mut self) -> io::Result<MenuExit> {
        let _cooked = CookedMode::enter()?;
        println!();
        print_help();

        loop {
            let input = match self.editor.readline("> ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    println!("Returning to session");
                    return Ok(MenuExit::Resume);
                }
                Err(err) => {
                    println!("Error: {:?}", err);
                    return Ok(MenuExit::Resume);
                }
            };

            let input = input.trim();
            if input.is_empty() {
                println!("Returning to session");
                return Ok(MenuExit::Resume);
            }
            let _ = self.editor.add_history_entry(input);

            let parts = split_words(input);
            if parts.is_empty() {
                continue;
            }
            let command = parts[0].to_lowercase();

            match command.as_str() {
                "help" => print_help(),
                "quit" | "q" => {
                    self.save_history();
                    return Ok(MenuExit::Quit);
                }
                "list" => {
                    let mounted = self.link.mounted();
                    if mounted.is_empty() {
                        println!("No drives mounted.");
                    }
                    for (slot, path) in mounted {
                        println!("{:>3}: {}", slot, path.display());
                    }
                }
                "mount" => {
                    if parts.len() < 3 {
                        println!("Usage: mount <drivenum> <file>");
                        continue;
                    }
                    match parts[1].parse::<u8>() {
                        Ok(slot) => self.link.mount(slot, &parts[2]),
                        Err(_) => println!("Invalid drive number."),
                    }
                }
                "umount" | "unmount" => {
                    if parts.len() < 2 {
                        println!("Usage: umount <drivenum>");
                        continue;
                    }
                    match parts[1].parse::<u8>() {
                        Ok(slot) => {
                            if self.link.unmount(slot).is_none() {
                                println!("Drive {} not mounted.", slot);
                            }
                        }
                        Err(_) => println!("Invalid drive number."),
                    }
                }
                "mkdisk" => {
                    if parts.len() < 2 {
                        println!("Usage: mkdisk <file>");
                        continue;
                    }
                    match create_blank(&parts[1]) {
                        Ok(()) => println!("Created {} ({} bytes)", parts[1], IMAGE_SIZE),
                        Err(e) => println!("Error: {}", e),
                    }
                }
                "sendsbl" => {
                    println!("Sending {}.", BOOT_LOADER);
                    self.send_file(BOOT_LOADER);
                }
                "sendfile" => {
                    let name = match parts.get(1) {
                        Some(name) => name.clone(),
                        None => match self.editor.readline("Filename? ") {
                            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
                            _ => continue,
                        },
                    };
                    self.send_file(&name);
                }
                "xget" | "xsend" => {
                    let direction = if command == "xget" {
                        Direction::Receive
                    } else {
                        Direction::Send
                    };
                    if self.transfers.start(&self.link, direction).is_some() {
                        // The transfer prompts for its file and owns the console
                        return Ok(MenuExit::Resume);
                    }
                    println!("A transfer is already running.");
                }
                "sendgs" => {
                    if let Err(e) = self.relay.send_raw(&[MENU_KEY]) {
                        println!("Error: {}", e);
                    }
                }
                "debug" => {
                    if log::max_level() >= LevelFilter::Debug {
                        log::set_max_level(LevelFilter::Info);
                        println!("Disabling debug");
                    } else {
                        log::set_max_level(LevelFilter::Debug);
                        println!("Enabling debug");
                    }
                }
                _ => {
                    println!("Unknown command: {}. Type 'help' for available commands.", command);
                }
            }
        }
    }

    fn send_file(&self, name: &str) {
        match std::fs::read(name) {
            Ok(data) => match self.relay.send_raw(&data) {
                Ok(()) => println!("Sent {} bytes.", data.len()),
                Err(e) => println!("Error: {}", e),
            },
            Err(e) => println!("Cannot read {}: {}", name, e),
        }
    }
}

/// Split a menu line into words; single or double quotes group spaces
fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word: Option<String> = None;
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => word.get_or_insert_with(String::new).push(c),
            (None, '"' | '\'') => {
                quote = Some(ch);
                word.get_or_insert_with(String::new);
            }
            (None, c) if c.is_whitespace() => words.extend(word.take()),
            (None, c) => word.get_or_insert_with(String::new).push(c),
        }
    }
    words.extend(word);
    words
}

fn print_help() {
    println!("Available commands:");
    println!("  list                     - List mounted drives");
    println!("  mount <drivenum> <file>  - Mount an image file as a drive (0-255)");
    println!("  umount <drivenum>        - Unmount a drive");
    println!("  mkdisk <file>            - Create a blank formatted image");
    println!("  sendsbl                  - Send the serial boot loader ({})", BOOT_LOADER);
    println!("  sendfile [file]          - Send a file raw");
    println!("  xget                     - XMODEM receive a file from the Altair");
    println!("  xsend                    - XMODEM send a file to the Altair");
    println!("  sendgs                   - Send Ctrl-] to the Altair");
    println!("  debug                    - Toggle debug logging");
    println!("  quit                     - Exit");
    println!("  <empty line>             - Return to session");
}

/// Bytes a terminal would send for a key press
fn key_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    if key.kind == KeyEventKind::Release {
        return None;
    }

    let bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let byte = match c {
                '@' | ' ' | '2' => 0x00,
                'a'..='z' => c as u8 - b'a' + 1,
                'A'..='Z' => c as u8 - b'A' + 1,
                '[' | '3' => 0x1B,
                '\\' | '4' => 0x1C,
                ']' | '5' => 0x1D,
                '^' | '6' => 0x1E,
                '_' | '7' => 0x1F,
                _ => return None,
            };
            vec![byte]
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).as_bytes().to_vec()
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::Backspace => vec![0x08],
        KeyCode::Esc => vec![0x1B],
        KeyCode::Delete => vec![0x7F],
        _ => return None,
    };
    Some(bytes)
}

fn echo(byte: u8) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if byte == b'\r' {
        out.write_all(b"\r\n")?;
    } else {
        out.write_all(&[byte])?;
    }
    out.flush()
}

fn relay_loop(relay: &Relay, menu: &mut Menu, local_echo: bool) -> io::Result<()> {
    loop {
        if relay.suspended() {
            thread::sleep(SUSPEND_POLL);
            continue;
        }
        if !event::poll(INPUT_POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        // A transfer may have started while we waited; its prompt owns the key
        if relay.suspended() {
            continue;
        }
        let Some(bytes) = key_bytes(&key) else {
            continue;
        };

        for byte in bytes {
            match relay.key(byte)? {
                Keystroke::Menu => {
                    if menu.run()? == MenuExit::Quit {
                        return Ok(());
                    }
                }
                Keystroke::Forwarded if local_echo => echo(byte)?,
                Keystroke::Forwarded => {}
            }
        }
    }
}

fn init_logging(quiet: bool) {
    // The filter passes everything; `log::max_level` alone decides, so the
    // menu `debug` toggle works whatever RUST_LOG says
    env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        // Raw mode needs explicit carriage returns
        .format(|buf, record| write!(buf, "[{}] {}\r\n", record.level(), record.args()))
        .init();

    log::set_max_level(initial_level(std::env::var("RUST_LOG").ok().as_deref(), quiet));
}

/// Level from RUST_LOG when it names one, otherwise from `--quiet`
fn initial_level(rust_log: Option<&str>, quiet: bool) -> LevelFilter {
    match rust_log.and_then(|value| value.trim().parse::<LevelFilter>().ok()) {
        Some(level) => level,
        None if quiet => LevelFilter::Warn,
        None => LevelFilter::Info,
    }
}

fn open_port(args: &Args) -> serialport::Result<Box<dyn SerialPort>> {
    let data_bits = match args.bytesize {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };
    let parity = match args.parity {
        ParityArg::None => serialport::Parity::None,
        ParityArg::Even => serialport::Parity::Even,
        ParityArg::Odd => serialport::Parity::Odd,
    };
    let stop_bits = if args.stopbits == 2 {
        StopBits::Two
    } else {
        StopBits::One
    };
    let flow_control = if args.rtscts {
        FlowControl::Hardware
    } else if args.xonxoff {
        FlowControl::Software
    } else {
        FlowControl::None
    };

    let mut port = serialport::new(args.port.as_str(), args.baudrate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(flow_control)
        .timeout(PORT_TIMEOUT)
        .open()?;

    if let Some(rts) = args.rts {
        port.write_request_to_send(rts != 0)?;
    }
    if let Some(dtr) = args.dtr {
        port.write_data_terminal_ready(dtr != 0)?;
    }
    Ok(port)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let port = open_port(&args)
        .map_err(|e| format!("Could not open serial port {}: {}", args.port, e))?;
    let reader = port.try_clone()?;

    if !args.quiet {
        eprintln!(
            "--- Serial drive for Altair on {}  {},{},{:?},{} ---",
            args.port, args.baudrate, args.bytesize, args.parity, args.stopbits
        );
        eprintln!("--- type Ctrl-] for command menu");
    }

    let mut drives = DriveTable::new();
    if args.mounts.is_empty() {
        drives.mount(0, DEFAULT_IMAGE);
    }
    for (slot, path) in &args.mounts {
        drives.mount(*slot, path.clone());
    }

    let link = Arc::new(Link::with_drives(port, drives));
    let transfers = TransferService::new(Xmodem::new(), ConsolePicker);

    let mut session = Session::new(Arc::clone(&link), io::stdout()).with_transfers(transfers.clone());
    thread::Builder::new()
        .name("serial-reader".into())
        .spawn(move || {
            if let Err(e) = session.run(reader) {
                error!("Serial read failed: {}", e);
            }
        })?;

    let relay = Relay::new(Arc::clone(&link));
    let mut menu = Menu::new(link, relay.clone(), transfers)?;

    let _raw = RawMode::enable()?;
    relay_loop(&relay, &mut menu, args.localecho)?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.quiet);

    if let Err(e) = run(args) {
        let _ = terminal::disable_raw_mode();
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
