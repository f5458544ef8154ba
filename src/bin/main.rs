use std::fs;
use std::path::PathBuf;

use clap::{
    Parser,
    Subcommand,
};
use esp_image_tool::{
    layout,
    ota_update,
    parse_size,
    Firmware,
    OtaUpdater,
    PartitionTable,
};

#[derive(Parser)]
#[command(name = "esp-image-tool")]
#[command(about = "ESP32 firmware image, partition table and OTA tool", long_about = None)]
struct Cli {
    /// The esp32 firmware image file
    image: PathBuf,

    /// Write changes to a copy of the image instead of modifying it in place
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the bootloader header and partition table
    Info,
    /// Resize partitions by name, eg. "factory=2M,vfs=0x400K"
    Resize {
        /// NAME=SIZE[,NAME=SIZE...]; a size of 0 expands to the free space
        spec: String,
    },
    /// Change the declared flash size, resizing the last partition to match
    FlashSize {
        /// New flash size (eg. 8M); must be a power of two megabytes
        size: String,
    },
    /// Replace the partition table with an OTA-enabled layout
    OtaTable {
        /// Size of each OTA app partition (default: recommended for flash)
        #[arg(short, long, default_value = "0")]
        app_size: String,
    },
    /// Replace the partition table with one loaded from a CSV file
    FromCsv {
        /// Input CSV file path
        csv: PathBuf,
    },
    /// Write the partition table to a CSV file
    ToCsv {
        /// Output CSV file path
        csv: PathBuf,
    },
    /// Extract the app image from the first app partition
    ExtractApp {
        /// Output file path (default: <image>.app-bin)
        output: Option<PathBuf>,
    },
    /// Erase the named partitions
    ErasePart {
        /// NAME[,NAME...]
        names: String,
    },
    /// Copy partitions to files, eg. "vfs=vfs.bin"
    ReadPart {
        /// NAME=FILE[,NAME=FILE...]
        spec: String,
    },
    /// Write files into partitions, eg. "vfs=vfs.bin"
    WritePart {
        /// NAME=FILE[,NAME=FILE...]
        spec: String,
    },
    /// Print the current OTA boot slot and the next update slot
    OtaInfo,
    /// Write an app image to the next OTA slot and set it to boot
    OtaUpdate {
        /// App image file to write
        firmware: PathBuf,

        /// Do not require the new firmware to validate itself on first boot
        #[arg(long)]
        no_rollback: bool,
    },
    /// Set the named OTA partition as the next boot partition
    SetBoot {
        /// Partition name (eg. "ota_1")
        name: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    // Operate on a copy when an output file is given.
    let path = match &cli.output {
        Some(output) => {
            fs::copy(&cli.image, output)?;
            output.clone()
        }
        None => cli.image.clone(),
    };

    let mut fw = Firmware::open(&path)?;

    match cli.command {
        Commands::Info => {
            println!("Chip type: {}", fw.header.chip_name());
            println!("Flash size: {}MB", fw.header.flash_size() / 0x100_000);
            print!("{}", fw.table);
        }
        Commands::Resize { spec } => {
            let mut table = fw.table.clone();
            for part in spec.split(',') {
                let (name, size) = part
                    .split_once('=')
                    .ok_or_else(|| format!("invalid resize spec '{part}': expected NAME=SIZE"))?;
                table.resize_part(name, parse_size(size)?)?;
            }
            table.check()?;
            fw.write_table(table)?;
            print!("{}", fw.table);
        }
        Commands::FlashSize { size } => {
            let size = parse_size(&size)?;
            fw.header.set_flash_size(size)?;
            let mut table = fw.table.clone();
            table.resize_flash(size)?;
            if fw.header.is_modified() {
                println!("Updating flash size ({}MB) in bootloader header...", size / 0x100_000);
                fw.update_bootloader()?;
            }
            fw.write_table(table)?;
            print!("{}", fw.table);
        }
        Commands::OtaTable { app_size } => {
            let table = layout::ota_table(&fw.table, parse_size(&app_size)?)?;
            fw.write_table(table)?;
            print!("{}", fw.table);
        }
        Commands::FromCsv { csv } => {
            let content = fs::read_to_string(&csv)?;
            let mut table = PartitionTable::from_csv(&content, fw.table.max_size)?;
            table.layout = fw.table.layout;
            table.check()?;
            fw.write_table(table)?;
            print!("{}", fw.table);
        }
        Commands::ToCsv { csv } => {
            fs::write(&csv, fw.table.to_csv()?)?;
            println!("Wrote partition table to {}", csv.display());
        }
        Commands::ExtractApp { output } => {
            let output = output.unwrap_or_else(|| {
                let mut name = cli.image.clone();
                name.set_extension("app-bin");
                name
            });
            let n = fw.save_app_image(&output)?;
            println!("Wrote {n:#x} bytes to {}", output.display());
        }
        Commands::ErasePart { names } => {
            for name in names.split(',') {
                let part = fw.table.by_name(name)?.clone();
                println!("Erasing partition '{name}'...");
                fw.erase_part(&part, None)?;
            }
        }
        Commands::ReadPart { spec } => {
            for part in spec.split(',') {
                let (name, file) = part
                    .split_once('=')
                    .ok_or_else(|| format!("invalid spec '{part}': expected NAME=FILE"))?;
                let entry = fw.table.by_name(name)?.clone();
                let data = fw.read_part(&entry)?;
                fs::write(file, &data)?;
                println!("Wrote {:#x} bytes to '{file}'.", data.len());
            }
        }
        Commands::WritePart { spec } => {
            for part in spec.split(',') {
                let (name, file) = part
                    .split_once('=')
                    .ok_or_else(|| format!("invalid spec '{part}': expected NAME=FILE"))?;
                let entry = fw.table.by_name(name)?.clone();
                let data = fs::read(file)?;
                let n = fw.write_part(&entry, &data)?;
                println!("Wrote {n:#x} bytes to '{name}'.");
            }
        }
        Commands::OtaInfo => {
            let ota = OtaUpdater::new(&mut fw, false)?;
            println!("OTA sequence number: {}", ota.sequence());
            println!("Current boot partition: {}", ota.current().name());
            println!("Next update partition: {}", ota.next_update().name());
        }
        Commands::OtaUpdate {
            firmware,
            no_rollback,
        } => {
            let image = fs::read(&firmware)?;
            if !fw.check_app_image(&image, &firmware.display().to_string()) {
                return Err(format!("'{}' is not an app image for this device", firmware.display()).into());
            }
            let part = ota_update(&mut fw, &image, no_rollback)?;
            println!("Wrote firmware to OTA partition '{}'.", part.name());
        }
        Commands::SetBoot { name } => {
            let part = fw.table.by_name(&name)?.clone();
            let mut ota = OtaUpdater::new(&mut fw, false)?;
            ota.set_boot(&mut fw, &part)?;
            println!("Partition '{name}' set as next boot partition.");
        }
    }

    Ok(())
}
