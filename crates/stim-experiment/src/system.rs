//! Facts about the machine and the moment a run starts.

use stim_session::ConfigSource;
use time::OffsetDateTime;

/// Get platform (OS family).
#[inline]
pub fn platform() -> &'static str {
    std::env::consts::OS
}

/// Get architecture.
#[inline]
pub fn arch() -> &'static str {
    std::env::consts::ARCH
}

/// Hostname of the machine, best effort.
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fresh participant identifier for runs launched without one.
pub fn generate_participant_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Start date of a run, `YYYY-MM-DD_HHhMM.SS.mmm` in local time (UTC if the offset is unknown).
pub fn run_date() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_date(now)
}

fn format_date(at: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}_{:02}h{:02}.{:02}.{:03}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.millisecond()
    )
}

/// Participant and environment metadata resolved at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub participant: String,
    pub date: String,
    pub host: String,
    pub platform: &'static str,
    pub arch: &'static str,
}

impl RunInfo {
    /// Participant comes from the `participant` query parameter, or is generated.
    pub fn resolve(source: &ConfigSource) -> Self {
        let participant = source
            .query_param("participant")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(generate_participant_id);
        Self {
            participant,
            date: run_date(),
            host: host_name(),
            platform: platform(),
            arch: arch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn date_is_zero_padded() {
        assert_eq!(
            format_date(datetime!(2024-03-07 09:05:04.012 UTC)),
            "2024-03-07_09h05.04.012"
        );
    }

    #[test]
    fn participant_from_query() {
        let source = ConfigSource::parse("file:///tmp/x/index.html?participant=p42").unwrap();
        assert_eq!(RunInfo::resolve(&source).participant, "p42");
    }

    #[test]
    fn participant_generated_when_absent() {
        let source = ConfigSource::parse("file:///tmp/x/index.html?participant=").unwrap();
        let info = RunInfo::resolve(&source);
        assert_eq!(info.participant.len(), 32);
        assert_eq!(info.platform, std::env::consts::OS);
    }
}
