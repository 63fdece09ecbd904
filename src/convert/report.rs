use std::path::PathBuf;
use std::time::Duration;

/// Outcome of one archive conversion. Partial-domain failures end up in
/// `warnings` rather than failing the conversion.
#[derive(Debug)]
pub struct ConversionReport {
    pub output_path: PathBuf,
    pub size_bytes: u64,
    pub timepoints: usize,
    pub omitted_domains: Vec<String>,
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl ConversionReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Human-readable detail string stored in the catalogue
    pub fn detail(&self) -> String {
        let base = format!(
            "converted {} timepoints in {}",
            self.timepoints,
            format_duration(self.duration.as_secs())
        );

        if self.warnings.is_empty() {
            base
        } else {
            format!(
                "{base}; converted with {} warnings: {}",
                self.warnings.len(),
                self.warnings.join("; ")
            )
        }
    }
}

/// Format a wall-clock duration the way operators read it, e.g.
/// "2 hours, 1 minute, 30 seconds"
pub fn format_duration(total_seconds: u64) -> String {
    let (minutes, seconds) = (total_seconds / 60, total_seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    let (days, hours) = (hours / 24, hours % 24);
    let (weeks, days) = (days / 7, days % 7);

    let units = [
        (weeks, "week"),
        (days, "day"),
        (hours, "hour"),
        (minutes, "minute"),
        (seconds, "second"),
    ];

    let parts: Vec<String> = units
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| {
            if *value == 1 {
                format!("{value} {unit}")
            } else {
                format!("{value} {unit}s")
            }
        })
        .collect();

    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_durations_in_operator_units() {
        assert_eq!(format_duration(0), "0 seconds");
        assert_eq!(format_duration(1), "1 second");
        assert_eq!(format_duration(7290), "2 hours, 1 minute, 30 seconds");
        assert_eq!(format_duration(8 * 24 * 3600), "1 week, 1 day");
    }

    #[test]
    fn detail_mentions_warnings_when_present() {
        let mut report = ConversionReport {
            output_path: PathBuf::from("/tmp/dataset.h5"),
            size_bytes: 1024,
            timepoints: 12,
            omitted_domains: vec!["containment".to_string()],
            warnings: vec![],
            duration: Duration::from_secs(61),
        };
        assert_eq!(report.detail(), "converted 12 timepoints in 1 minute, 1 second");
        assert!(!report.has_warnings());

        report.warnings.push("domain vessel: partial read".to_string());
        assert!(report.detail().contains("converted with 1 warnings"));
        assert!(report.has_warnings());
    }
}
