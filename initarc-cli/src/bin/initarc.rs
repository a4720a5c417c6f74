use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use initarc::extract::{self, ErrorPolicy, ExtractReport};
use initarc::{ArchiveError, FileType, Listing, RecordReader, vtoc};
use log::{error, info};

use clap::builder::styling::*;
pub fn styles() -> clap::builder::Styles {
    Styles::styled()
        .header(AnsiColor::Green.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Yellow.on_default() | Effects::BOLD)
}

/// tool to list and extract initramfs archives
#[derive(Parser)]
#[command(author,
          version,
          name = "initarc",
          max_term_width = 98,
          styles = styles(),
)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the records of a cpio newc archive
    List {
        /// CPIO path
        archive: PathBuf,

        /// Skip BYTES at the start of ARCHIVE
        #[arg(short, long, default_value_t = 0, name = "BYTES")]
        offset: u64,
    },

    /// Extract a cpio newc archive
    Extract {
        /// CPIO path
        archive: PathBuf,

        /// Skip BYTES at the start of ARCHIVE
        #[arg(short, long, default_value_t = 0, name = "BYTES")]
        offset: u64,

        /// Extract to [PATHNAME]
        #[arg(short, long, default_value = "out", name = "PATHNAME")]
        dest: PathBuf,

        /// Fail if owners, permissions or device nodes can't be set
        #[arg(long)]
        force_priv: bool,

        /// Log failed members and keep extracting
        #[arg(short, long)]
        keep_going: bool,
    },

    /// VTOC archives
    #[command(subcommand)]
    Vtoc(VtocCmd),
}

#[derive(Subcommand)]
enum VtocCmd {
    /// Create an archive of every path below DIRS
    Create {
        /// Write the archive to [PATHNAME]
        #[arg(short, long, name = "PATHNAME")]
        output: PathBuf,

        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },

    /// List the entries of an archive
    List {
        /// VTOC path
        archive: PathBuf,
    },

    /// Extract an archive
    Extract {
        /// VTOC path
        archive: PathBuf,

        /// Extract to [PATHNAME]
        #[arg(short, long, default_value = "out", name = "PATHNAME")]
        dest: PathBuf,

        /// Log failed entries and keep extracting
        #[arg(short, long)]
        keep_going: bool,
    },
}

fn policy(keep_going: bool) -> ErrorPolicy {
    if keep_going { ErrorPolicy::Continue } else { ErrorPolicy::Abort }
}

fn list(archive: &Path, offset: u64) -> Result<(), ArchiveError> {
    let file = BufReader::new(File::open(archive)?);
    let mut reader = RecordReader::with_offset(file, offset)?;
    let mut stdout = std::io::stdout().lock();
    while let Some(mut record) = reader.read_record()? {
        let target = match record.file_type() {
            Some(FileType::Symlink) => Some(record.read_data()?),
            _ => None,
        };
        let target = target.as_deref().map(String::from_utf8_lossy);
        let listing =
            Listing { header: &record.header, name: record.name(), target: target.as_deref() };
        writeln!(stdout, "{listing}")?;
    }
    Ok(())
}

fn extract(
    archive: &Path,
    offset: u64,
    dest: &Path,
    force_priv: bool,
    policy: ErrorPolicy,
) -> Result<ExtractReport, ArchiveError> {
    let file = BufReader::new(File::open(archive)?);
    let mut reader = RecordReader::with_offset(file, offset)?;
    extract::unpack(&mut reader, dest, force_priv, policy)
}

fn vtoc_create(output: &Path, dirs: &[PathBuf]) -> Result<(), ArchiveError> {
    let dirs = dirs.iter().map(|dir| dir.canonicalize()).collect::<Result<Vec<_>, _>>()?;
    let entries = vtoc::build_vtoc(&dirs)?;
    let mut out = BufWriter::new(File::create(output)?);
    let written = vtoc::write_archive(&mut out, Path::new("/"), &entries)?;
    out.flush()?;
    info!("wrote {} entries, {written} bytes to {}", entries.len(), output.display());
    Ok(())
}

fn vtoc_list(archive: &Path) -> Result<(), ArchiveError> {
    let (_, entries) = vtoc::load_vtoc(archive)?;
    let mut stdout = std::io::stdout().lock();
    for entry in entries {
        writeln!(stdout, "{entry}")?;
    }
    Ok(())
}

fn finish(report: ExtractReport) -> ExitCode {
    info!("created {}, skipped {}", report.created, report.skipped);
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        error!("{} members failed", report.failures.len());
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let result = match args.cmd {
        Cmd::List { archive, offset } => list(&archive, offset).map(|()| ExitCode::SUCCESS),
        Cmd::Extract { archive, offset, dest, force_priv, keep_going } => {
            extract(&archive, offset, &dest, force_priv, policy(keep_going)).map(finish)
        }
        Cmd::Vtoc(VtocCmd::Create { output, dirs }) => {
            vtoc_create(&output, &dirs).map(|()| ExitCode::SUCCESS)
        }
        Cmd::Vtoc(VtocCmd::List { archive }) => vtoc_list(&archive).map(|()| ExitCode::SUCCESS),
        Cmd::Vtoc(VtocCmd::Extract { archive, dest, keep_going }) => {
            vtoc::extract_archive(&archive, &dest, policy(keep_going)).map(finish)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
