//! Various small helper functions

use std::num::ParseIntError;
use std::time::Duration;

/// Parses a Duration from a string containing seconds.
/// Useful for command line parsing
pub fn parse_seconds(src: &str) -> Result<Duration, ParseIntError> {
    let seconds = src.parse::<u64>()?;
    Ok(Duration::from_secs(seconds))
}

/// Builds the name of the reply queue owned by a gateway instance
pub fn reply_queue_name(work_queue: &str, instance: &str) -> String {
    format!("{}.reply.{}", work_queue, instance)
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_seconds_into_duration() {
        assert_eq!(parse_seconds("30"), Ok(Duration::from_secs(30)));
    }

    #[test]
    fn reject_fractional_seconds() {
        assert!(parse_seconds("1.5").is_err());
        assert!(parse_seconds("").is_err());
    }

    #[test]
    fn derive_reply_queue_from_instance() {
        assert_eq!(
            reply_queue_name("compile_queue", "gw-1"),
            "compile_queue.reply.gw-1"
        );
    }
}
