//! Command implementations for the proxycache CLI

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::cache::config::parse_byte_size;
use crate::cache::remote::{LocalFileIo, RemoteIo};
use crate::cli::args::{Cli, Command, ConfigFormat};
use crate::cli::config::CliConfig;
use crate::cli::errors::{CliError, CliResult};
use crate::cli::output::{
    format_cat_pass, format_file_stat, format_purge_report, print_output, OutputFormat,
};
use crate::proxycache::ProxyCache;

/// Largest read buffer `cat --chunk` will allocate
const MAX_CHUNK: u64 = 64 * 1024 * 1024;

/// Run the parsed command line
pub fn dispatch(cli: Cli) -> CliResult<()> {
    let config = CliConfig::from(&cli).load()?;
    let format = cli.output.clone();

    match cli.command {
        Command::Config { format: config_format } => {
            let text = match config_format {
                ConfigFormat::Toml => config.to_toml_string()?,
                ConfigFormat::Json => config.to_json_string()?,
            };
            print_output(text.trim_end());
            Ok(())
        }
        Command::Cat {
            path,
            passes,
            chunk,
            print,
        } => {
            let chunk = chunk_size(&chunk)?;
            let cache = ProxyCache::new(config)?;
            let result = cat(&cache, &path, passes, chunk, print, &format);
            cache.shutdown();
            result
        }
        Command::Stat { path } => {
            let cache = ProxyCache::new(config)?;
            let absolute = absolute_path(&path)?;
            let stat = cache.stat(&absolute);
            print_output(&format_file_stat(&absolute, stat.as_ref(), &format));
            cache.shutdown();
            Ok(())
        }
        Command::Purge => {
            let cache = ProxyCache::new(config)?;
            let report = cache.purge_now();
            cache.shutdown();
            print_output(&format_purge_report(&report?, &format));
            Ok(())
        }
    }
}

fn chunk_size(arg: &str) -> CliResult<usize> {
    let chunk =
        parse_byte_size(arg).map_err(|e| CliError::ArgumentError(format!("--chunk: {}", e)))?;
    if chunk == 0 {
        return Err(CliError::ArgumentError("--chunk must be positive".into()));
    }
    if chunk > MAX_CHUNK {
        return Err(CliError::ArgumentError(format!(
            "--chunk {} exceeds the {} byte limit",
            arg, MAX_CHUNK
        )));
    }
    Ok(chunk as usize)
}

fn absolute_path(path: &Path) -> CliResult<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(absolute.to_string_lossy().into_owned())
}

fn cat(
    cache: &ProxyCache,
    path: &Path,
    passes: usize,
    chunk: usize,
    print: bool,
    format: &OutputFormat,
) -> CliResult<()> {
    let remote: Arc<dyn RemoteIo> = Arc::new(LocalFileIo::open(path)?);
    let size = remote.size()?;
    let attached = cache.attach(Arc::clone(&remote));
    if attached.is_none() {
        log::info!("{} not cached, reading directly", remote.path());
    }

    let mut buf = vec![0u8; chunk];
    let stdout = std::io::stdout();
    for pass in 1..=passes {
        let before = cache.stats().cache;
        let mut offset = 0u64;
        while offset < size {
            let n = match &attached {
                Some(io) => io.read_at(offset, &mut buf)?,
                None => remote.read_at(offset, &mut buf)?,
            };
            if n == 0 {
                break;
            }
            if print && pass == 1 {
                stdout.lock().write_all(&buf[..n])?;
            }
            offset += n as u64;
        }
        let delta = cache.stats().cache.since(&before);
        if !print {
            print_output(&format_cat_pass(pass, offset, &delta, format));
        } else {
            log::info!("{}", format_cat_pass(pass, offset, &delta, &OutputFormat::Human));
        }
    }

    if let Some(io) = attached {
        io.detach();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_accepts_units() {
        assert_eq!(chunk_size("256k").unwrap(), 256 * 1024);
        assert_eq!(chunk_size("64m").unwrap(), MAX_CHUNK as usize);
    }

    #[test]
    fn chunk_size_rejects_zero_and_huge_values() {
        assert!(matches!(chunk_size("0"), Err(CliError::ArgumentError(_))));
        assert!(matches!(chunk_size("1t"), Err(CliError::ArgumentError(_))));
        assert!(matches!(chunk_size("67108865"), Err(CliError::ArgumentError(_))));
    }
}
