use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::extract::{DEFAULT_TIMEOUT, DEFAULT_TOOLS_DIR};
use crate::render::{DEFAULT_SIZE, MAX_SIZE};

#[derive(Parser, Debug)]
#[command(name = "appimage-thumbnailer")]
#[command(version)]
#[command(about = "Render the icon embedded in an AppImage as a PNG thumbnail", long_about = None)]
#[command(after_help = "Examples:\n  \
  appimage-thumbnailer MyApp.AppImage icon.png          256px thumbnail\n  \
  appimage-thumbnailer MyApp.AppImage icon.png 128      128px thumbnail\n  \
  appimage-thumbnailer -vv MyApp.AppImage /tmp/t.png    trace every step")]
pub struct Cli {
    /// AppImage to read the icon from
    #[arg(value_name = "APPIMAGE")]
    pub archive: PathBuf,

    /// Where to write the PNG thumbnail
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Thumbnail edge length in pixels (1-4096, default 256)
    #[arg(value_name = "SIZE", allow_hyphen_values = true)]
    pub size: Option<String>,

    /// Directory holding bundled unsquashfs/dwarfsextract/dwarfsck
    #[arg(
        long,
        value_name = "DIR",
        env = "APPIMAGE_THUMBNAILER_TOOLS_DIR",
        default_value = DEFAULT_TOOLS_DIR
    )]
    pub tools_dir: PathBuf,

    /// Seconds before an external tool is killed
    #[arg(
        long,
        value_name = "SECS",
        env = "APPIMAGE_THUMBNAILER_TIMEOUT",
        default_value_t = DEFAULT_TIMEOUT.as_secs()
    )]
    pub timeout: u64,

    /// Verbose logging (-vv => trace)
    #[arg(short = 'v', action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Requested thumbnail size, with anything unusable replaced by the
    /// default.
    pub fn size(&self) -> u32 {
        self.size.as_deref().map_or(DEFAULT_SIZE, parse_size)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    /// Log filter used when `APPIMAGE_THUMBNAILER_LOG` is unset.
    pub fn default_log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Parse a size argument leniently.
///
/// Thumbnailers are invoked by desktop shells with whatever they have on
/// hand, so a bad size is never an error: values that are not integers in
/// `1..=4096` become [`DEFAULT_SIZE`].
pub fn parse_size(raw: &str) -> u32 {
    match raw.trim().parse::<i64>() {
        Ok(size) if (1..=i64::from(MAX_SIZE)).contains(&size) => size as u32,
        _ => {
            debug!("ignoring thumbnail size '{raw}', using {DEFAULT_SIZE}");
            DEFAULT_SIZE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn bad_size_stays_quiet_at_warn_level() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            assert_eq!(parse_size("abc"), DEFAULT_SIZE);
            assert_eq!(parse_size("0"), DEFAULT_SIZE);
            tracing::warn!("end of test");
        });

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("end of test"));
        assert!(!logged.contains("thumbnail size"), "{logged}");
    }

    #[test]
    fn valid_sizes_pass_through() {
        assert_eq!(parse_size("1"), 1);
        assert_eq!(parse_size("128"), 128);
        assert_eq!(parse_size(" 4096 "), 4096);
    }

    #[test]
    fn unusable_sizes_fall_back() {
        for raw in ["0", "-5", "abc", "4097", "", "12.5", "99999999999999999999"] {
            assert_eq!(parse_size(raw), DEFAULT_SIZE, "size {raw:?}");
        }
    }

    #[test]
    fn parses_positionals_and_options() {
        let cli = Cli::try_parse_from([
            "appimage-thumbnailer",
            "-vv",
            "--timeout",
            "5",
            "--tools-dir",
            "/opt/tools",
            "app.AppImage",
            "out.png",
            "-5",
        ])
        .unwrap();

        assert_eq!(cli.archive, PathBuf::from("app.AppImage"));
        assert_eq!(cli.output, PathBuf::from("out.png"));
        assert_eq!(cli.size(), DEFAULT_SIZE);
        assert_eq!(cli.timeout(), Duration::from_secs(5));
        assert_eq!(cli.tools_dir, PathBuf::from("/opt/tools"));
        assert_eq!(cli.default_log_level(), "trace");
    }

    #[test]
    fn size_is_optional() {
        let cli = Cli::try_parse_from(["appimage-thumbnailer", "a", "b"]).unwrap();
        assert_eq!(cli.size(), DEFAULT_SIZE);
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.default_log_level(), "warn");

        assert!(Cli::try_parse_from(["appimage-thumbnailer", "a"]).is_err());
    }
}
