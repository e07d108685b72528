use blockidx_log as logging;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use blockidx_log::{log_info, log_warn};
use blockidx_parser::{
    rollback_address_index, update_address_index, update_hash_index, Config, CoreUpdater,
    DataLayout, State, SUPPORTED_COINS,
};
use blockidx_storage::fjall::FjallStore;
use fs2::FileExt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Command {
    /// Core files, then both indexes.
    Update,
    UpdateCore,
    UpdateIndexes,
    UpdateHashIndex,
    UpdateAddressIndex,
}

impl Command {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "update" => Some(Self::Update),
            "update-core" => Some(Self::UpdateCore),
            "update-indexes" => Some(Self::UpdateIndexes),
            "update-hash-index" => Some(Self::UpdateHashIndex),
            "update-address-index" => Some(Self::UpdateAddressIndex),
            _ => None,
        }
    }

    fn runs_core(self) -> bool {
        matches!(self, Self::Update | Self::UpdateCore)
    }

    fn runs_hash_index(self) -> bool {
        matches!(self, Self::Update | Self::UpdateIndexes | Self::UpdateHashIndex)
    }

    fn runs_address_index(self) -> bool {
        matches!(self, Self::Update | Self::UpdateIndexes | Self::UpdateAddressIndex)
    }
}

#[derive(Clone, Debug, PartialEq)]
struct GenerateConfig {
    coin: String,
    data_dir: PathBuf,
    coin_dir: PathBuf,
    magic: Option<u32>,
    max_block: Option<i32>,
}

#[derive(Clone, Debug, PartialEq)]
struct RunConfig {
    command: Command,
    config_path: PathBuf,
    max_block: Option<i32>,
    single_threaded: bool,
}

#[derive(Debug, PartialEq)]
enum CliAction {
    GenerateConfig(GenerateConfig),
    Run(RunConfig, LogSettings),
    PrintHelp,
    PrintVersion,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct LogSettings {
    level: logging::Level,
    format: logging::Format,
    timestamps: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: logging::Level::Info,
            format: logging::Format::Text,
            timestamps: true,
        }
    }
}

struct DataDirLock {
    _file: File,
}

fn lock_data_dir(layout: &DataLayout) -> Result<DataDirLock, String> {
    fs::create_dir_all(layout.root())
        .map_err(|err| format!("failed to create data dir {}: {err}", layout.root().display()))?;
    let lock_path = layout.lock_file();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ = File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let suffix = if holder.is_empty() {
                String::new()
            } else {
                format!(" ({holder})")
            };
            Err(format!(
                "data dir {} is already locked by another blockidx run; lock file {}{suffix}",
                layout.root().display(),
                lock_path.display()
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            layout.root().display(),
            lock_path.display()
        )),
    }
}

pub fn run_entry() -> Result<(), String> {
    match parse_args_from(std::env::args().skip(1))? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("blockidx {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::GenerateConfig(options) => {
            let path = generate_config(&options)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        CliAction::Run(config, log) => {
            logging::init(logging::LogConfig {
                level: log.level,
                format: log.format,
                timestamps: log.timestamps,
            });
            run(&config).map(|_| ())
        }
    }
}

/// Writes `<data-dir>/config.json` for a known coin and returns its path.
fn generate_config(options: &GenerateConfig) -> Result<PathBuf, String> {
    if !options.coin_dir.is_dir() {
        return Err(format!(
            "coin directory {} does not exist",
            options.coin_dir.display()
        ));
    }
    let mut config = Config::for_coin(
        &options.coin,
        options.data_dir.clone(),
        options.coin_dir.clone(),
        options.magic,
    )
    .map_err(|err| err.to_string())?;
    if let Some(max_block) = options.max_block {
        config.parser.max_block_num = max_block;
    }
    let layout = DataLayout::new(&options.data_dir);
    let path = layout.config_file();
    config.save(&path).map_err(|err| err.to_string())?;
    Ok(path)
}

/// Summary of one run, mostly for tests.
#[derive(Debug, Default)]
struct RunReport {
    core: Option<State>,
    hash_index: Option<State>,
    address_index: Option<State>,
}

fn run(options: &RunConfig) -> Result<RunReport, String> {
    let started = Instant::now();
    let mut config = Config::load(&options.config_path).map_err(|err| err.to_string())?;
    if let Some(max_block) = options.max_block {
        config.parser.max_block_num = max_block;
    }
    let layout = DataLayout::new(&config.chain.data_directory);
    if options.command.runs_core() && !config.parser.disk.blocks_dir().is_dir() {
        return Err(format!(
            "block directory {} does not exist",
            config.parser.disk.blocks_dir().display()
        ));
    }
    let _lock = lock_data_dir(&layout)?;
    layout
        .create_dirs()
        .map_err(|err| format!("failed to create data layout: {err}"))?;

    let hash_store = open_store(&layout.hash_index_dir())?;
    let address_store = open_store(&layout.address_index_dir())?;
    let mut report = RunReport::default();

    if options.command.runs_core() {
        let mut updater = CoreUpdater::open(&layout, &config, Arc::clone(&hash_store))
            .map_err(|err| err.to_string())?;
        let state = updater
            .update(options.single_threaded, |target| {
                rollback_address_index(&layout, Arc::clone(&address_store), target)
            })
            .map_err(|err| err.to_string())?;
        log_info!(
            "core at {} blocks, {} transactions",
            state.block_count,
            state.tx_count
        );
        report.core = Some(state);
    }
    if options.command.runs_hash_index() {
        let state = update_hash_index(&layout, &config, Arc::clone(&hash_store))
            .map_err(|err| err.to_string())?;
        log_info!("hash index at {} transactions", state.tx_count);
        report.hash_index = Some(state);
    }
    if options.command.runs_address_index() {
        let state = update_address_index(&layout, Arc::clone(&address_store))
            .map_err(|err| err.to_string())?;
        log_info!("address index at {} transactions", state.tx_count);
        report.address_index = Some(state);
    }
    if report.core.is_none() && !layout.core_checkpoint().exists() {
        log_warn!("no core checkpoint in {}; run update-core first", layout.root().display());
    }

    log_info!("finished in {} ms", started.elapsed().as_millis());
    Ok(report)
}

fn open_store(path: &Path) -> Result<Arc<FjallStore>, String> {
    FjallStore::open(path)
        .map(Arc::new)
        .map_err(|err| format!("failed to open store {}: {err}", path.display()))
}

fn parse_magic(raw: &str) -> Option<u32> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut command: Option<Command> = None;
    let mut generate = false;
    let mut coin: Option<String> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut coin_dir: Option<PathBuf> = None;
    let mut magic: Option<u32> = None;
    let mut max_block: Option<i32> = None;
    let mut single_threaded = false;
    let mut log = LogSettings::default();
    let mut args = raw_args.into_iter().peekable();

    if let Some(first) = args.peek().map(|value| value.as_str()) {
        match first {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            "generate-config" => {
                generate = true;
                let _ = args.next();
            }
            other => {
                if let Some(parsed) = Command::parse(other) {
                    command = Some(parsed);
                    let _ = args.next();
                }
            }
        }
    }
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --config\n{}", usage()))?;
                config_path = Some(PathBuf::from(value));
            }
            "--data-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --data-dir\n{}", usage()))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--coin-directory" | "--coin-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --coin-directory\n{}", usage()))?;
                coin_dir = Some(PathBuf::from(value));
            }
            "--magic" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --magic\n{}", usage()))?;
                magic = Some(
                    parse_magic(&value)
                        .ok_or_else(|| format!("invalid magic '{value}'\n{}", usage()))?,
                );
            }
            "--max-block" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --max-block\n{}", usage()))?;
                max_block = Some(
                    value
                        .parse::<i32>()
                        .map_err(|_| format!("invalid max block '{value}'\n{}", usage()))?,
                );
            }
            "--single-threaded" => single_threaded = true,
            "--log-level" | "--loglevel" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log.level = logging::Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
            }
            "--log-format" | "--logformat" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log.format = logging::Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
            }
            "--log-timestamps" | "--logtimestamps" => log.timestamps = true,
            "--no-log-timestamps" | "--no-logtimestamps" => log.timestamps = false,
            other if generate && coin.is_none() && !other.starts_with('-') => {
                coin = Some(other.to_string());
            }
            other => {
                return Err(format!("unknown argument '{other}'\n{}", usage()));
            }
        }
    }

    if generate {
        let coin = coin.ok_or_else(|| {
            format!(
                "generate-config needs a coin ({})\n{}",
                SUPPORTED_COINS.join("|"),
                usage()
            )
        })?;
        let data_dir =
            data_dir.ok_or_else(|| format!("generate-config needs --data-dir\n{}", usage()))?;
        let coin_dir = coin_dir
            .ok_or_else(|| format!("generate-config needs --coin-directory\n{}", usage()))?;
        return Ok(CliAction::GenerateConfig(GenerateConfig {
            coin,
            data_dir,
            coin_dir,
            magic,
            max_block,
        }));
    }

    let command = command.ok_or_else(|| format!("missing command\n{}", usage()))?;
    if magic.is_some() || coin_dir.is_some() {
        return Err(format!(
            "--magic and --coin-directory only apply to generate-config\n{}",
            usage()
        ));
    }
    let config_path = match (config_path, data_dir) {
        (Some(path), _) => path,
        (None, Some(dir)) => DataLayout::new(dir).config_file(),
        (None, None) => {
            return Err(format!("{command:?} needs --config or --data-dir\n{}", usage()));
        }
    };
    Ok(CliAction::Run(
        RunConfig {
            command,
            config_path,
            max_block,
            single_threaded,
        },
        log,
    ))
}

fn usage() -> String {
    [
        "Usage:",
        "  blockidx generate-config <coin> --data-dir <dir> --coin-directory <dir> [options]",
        "  blockidx <command> (--config <file> | --data-dir <dir>) [options]",
        "",
        "Commands:",
        "  help                  Print this help and exit",
        "  version               Print version and exit",
        "  generate-config       Write <data-dir>/config.json for a coin",
        "  update                Parse new blocks, then update both indexes",
        "  update-core           Parse new blocks only",
        "  update-indexes        Update the hash and address indexes",
        "  update-hash-index     Update the tx/address hash index",
        "  update-address-index  Update the address occurrence index",
        "",
        "Coins:",
        "  bitcoin | bitcoin_testnet | bitcoin_regtest | litecoin | litecoin_testnet",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --config  Config file (default: <data-dir>/config.json)",
        "  --data-dir  Output data directory",
        "  --coin-directory  Node data directory holding blocks/ (generate-config only)",
        "  --magic  Block file magic, hex with 0x or decimal (generate-config only)",
        "  --max-block  Blocks to parse: >0 exact count, <0 stay that far behind the tip, 0 all",
        "  --single-threaded  Run every parser stage on the calling thread",
        "  --log-level  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --log-format  Log output format (text|json) (default: text)",
        "  --log-timestamps  Enable timestamps in text logs (default: on)",
        "  --no-log-timestamps  Disable timestamps in text logs",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockidx_parser::encode_block_file;
    use blockidx_primitives::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn help_and_version_short_circuit() {
        assert_eq!(parse_args_from(args(&["help"])), Ok(CliAction::PrintHelp));
        assert_eq!(parse_args_from(args(&["version"])), Ok(CliAction::PrintVersion));
        assert!(parse_args_from(args(&["update", "--bogus", "--help"])).is_err());
        assert_eq!(
            parse_args_from(args(&["update", "--help"])),
            Ok(CliAction::PrintHelp)
        );
    }

    #[test]
    fn generate_config_takes_a_coin_and_directories() {
        let action = parse_args_from(args(&[
            "generate-config",
            "bitcoin_regtest",
            "--data-dir",
            "/tmp/out",
            "--coin-directory",
            "/tmp/node",
            "--magic",
            "0xfabfb5da",
            "--max-block",
            "-6",
        ]))
        .expect("parse");
        assert_eq!(
            action,
            CliAction::GenerateConfig(GenerateConfig {
                coin: "bitcoin_regtest".to_string(),
                data_dir: PathBuf::from("/tmp/out"),
                coin_dir: PathBuf::from("/tmp/node"),
                magic: Some(0xfabf_b5da),
                max_block: Some(-6),
            })
        );
        let missing = parse_args_from(args(&["generate-config", "--data-dir", "/tmp/out"]));
        assert!(missing.is_err());
    }

    #[test]
    fn run_commands_default_the_config_into_the_data_dir() {
        let action = parse_args_from(args(&[
            "update-core",
            "--data-dir",
            "/tmp/out",
            "--single-threaded",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--no-log-timestamps",
        ]))
        .expect("parse");
        let CliAction::Run(config, log) = action else {
            panic!("expected a run action");
        };
        assert_eq!(config.command, Command::UpdateCore);
        assert_eq!(config.config_path, PathBuf::from("/tmp/out/config.json"));
        assert!(config.single_threaded);
        assert_eq!(log.level, logging::Level::Debug);
        assert_eq!(log.format, logging::Format::Json);
        assert!(!log.timestamps);

        assert!(parse_args_from(args(&["update"])).is_err());
        assert!(parse_args_from(args(&["frobnicate"])).is_err());
        assert!(parse_args_from(args(&["update", "--config", "c.json", "--magic", "1"])).is_err());
    }

    #[test]
    fn commands_select_their_stages() {
        assert!(Command::Update.runs_core());
        assert!(Command::Update.runs_hash_index());
        assert!(Command::Update.runs_address_index());
        assert!(!Command::UpdateIndexes.runs_core());
        assert!(Command::UpdateHashIndex.runs_hash_index());
        assert!(!Command::UpdateHashIndex.runs_address_index());
        assert!(!Command::UpdateAddressIndex.runs_hash_index());
    }

    #[test]
    fn magic_accepts_hex_and_decimal() {
        assert_eq!(parse_magic("0xd9b4bef9"), Some(0xd9b4_bef9));
        assert_eq!(parse_magic("16"), Some(16));
        assert_eq!(parse_magic("0xzz"), None);
    }

    fn coinbase_block(prev_block: [u8; 32], height: u32) -> Block {
        let mut script_pubkey = vec![0x76, 0xa9, 0x14];
        script_pubkey.extend_from_slice(&[height as u8 + 1; 20]);
        script_pubkey.extend_from_slice(&[0x88, 0xac]);
        Block {
            header: BlockHeader {
                version: 4,
                prev_block,
                merkle_root: [0u8; 32],
                time: 1_600_000_000 + height,
                bits: 0x207f_ffff,
                nonce: height,
            },
            transactions: vec![Transaction {
                version: 1,
                vin: vec![TxIn {
                    prevout: OutPoint {
                        hash: [0u8; 32],
                        index: u32::MAX,
                    },
                    script_sig: vec![0x04, height as u8, 0, 0, 0],
                    sequence: u32::MAX,
                    witness: Vec::new(),
                }],
                vout: vec![TxOut {
                    value: 5_000_000_000,
                    script_pubkey,
                }],
                lock_time: 0,
            }],
        }
    }

    #[test]
    fn full_update_runs_against_a_generated_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = dir.path().join("node");
        let data = dir.path().join("data");
        fs::create_dir_all(node.join("regtest/blocks")).expect("blocks dir");

        let mut blocks = Vec::new();
        let mut prev = [0u8; 32];
        for height in 0..3 {
            let block = coinbase_block(prev, height);
            prev = block.header.hash();
            blocks.push(block);
        }
        fs::write(
            node.join("regtest/blocks/blk00000.dat"),
            encode_block_file(0xdab5_bffa, &blocks),
        )
        .expect("block file");

        let config_path = generate_config(&GenerateConfig {
            coin: "bitcoin_regtest".to_string(),
            data_dir: data.clone(),
            coin_dir: node,
            magic: None,
            max_block: None,
        })
        .expect("generate");
        let mut config = Config::load(&config_path).expect("load");
        config.parser.bloom.pubkey_capacity = 64;
        config.parser.bloom.scripthash_capacity = 64;
        config.parser.bloom.multisig_capacity = 64;
        config.save(&config_path).expect("save");

        let report = run(&RunConfig {
            command: Command::Update,
            config_path: config_path.clone(),
            max_block: Some(-1),
            single_threaded: false,
        })
        .expect("run");
        assert_eq!(report.core.map(|state| state.block_count), Some(2));
        assert_eq!(report.hash_index.map(|state| state.tx_count), Some(2));
        assert_eq!(report.address_index.map(|state| state.tx_count), Some(2));

        let report = run(&RunConfig {
            command: Command::Update,
            config_path,
            max_block: None,
            single_threaded: true,
        })
        .expect("rerun");
        assert_eq!(report.core.map(|state| state.tx_count), Some(3));
        assert_eq!(report.address_index.map(|state| state.tx_count), Some(3));
    }

    #[test]
    fn second_lock_on_a_data_dir_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = DataLayout::new(dir.path());
        let _held = lock_data_dir(&layout).expect("first lock");
        let err = lock_data_dir(&layout).err().expect("second lock must fail");
        assert!(err.contains("already locked"), "{err}");
    }
}
