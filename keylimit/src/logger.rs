use std::fmt::Write;

use jiff::{Zoned, tz::TimeZone};
use log::Record;
use logforth::{
    append::Stdout,
    layout::{JsonLayout, Layout},
};

use crate::args::{Args, LogStyle};

/// `{timestamp} {level}  {message}`, timestamps in UTC.
#[derive(Debug, Clone)]
struct GatewayLayout {
    colored: bool,
}

impl GatewayLayout {
    fn colored() -> Self {
        Self { colored: true }
    }

    fn plain() -> Self {
        Self { colored: false }
    }

    fn level(&self, level: log::Level) -> String {
        if !self.colored {
            return format!("{level:>5}");
        }

        let color = match level {
            log::Level::Error => 31,
            log::Level::Warn => 33,
            log::Level::Info => 32,
            log::Level::Debug => 34,
            log::Level::Trace => 35,
        };

        format!("\x1b[{color}m{level:>5}\x1b[0m")
    }
}

impl Layout for GatewayLayout {
    fn format(
        &self,
        record: &Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();
        let now = Zoned::now().with_time_zone(TimeZone::UTC);

        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        write!(output, "{}  ", self.level(record.level()))?;
        write!(output, "{}", record.args())?;

        Ok(output.into_bytes())
    }
}

pub(super) fn init(args: &Args) {
    logforth::builder()
        .dispatch(|d| {
            let d = d.filter(args.log_level.env_filter());

            match args.log_style {
                LogStyle::Color => d.append(Stdout::default().with_layout(GatewayLayout::colored())),
                LogStyle::Text => d.append(Stdout::default().with_layout(GatewayLayout::plain())),
                LogStyle::Json => d.append(Stdout::default().with_layout(JsonLayout::default())),
            }
        })
        .apply();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_levels_are_padded() {
        assert_eq!(GatewayLayout::plain().level(log::Level::Info), " INFO");
        assert_eq!(GatewayLayout::plain().level(log::Level::Error), "ERROR");
    }

    #[test]
    fn colored_levels_are_wrapped() {
        assert_eq!(GatewayLayout::colored().level(log::Level::Warn), "\x1b[33m WARN\x1b[0m");
    }
}
