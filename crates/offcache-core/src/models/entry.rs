use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one stored entry, as listed by `CacheStorage::entries`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryInfo {
    pub identity: String,
    pub status: u16,
    pub cached_at: DateTime<Utc>,
}

impl EntryInfo {
    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Clock skew lands here too
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn aged(minutes: i64) -> EntryInfo {
        EntryInfo {
            identity: "GET http://localhost/".to_string(),
            status: 200,
            cached_at: Utc::now() - Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_age_display_just_now() {
        assert_eq!(aged(0).age_display(), "just now");
    }

    #[test]
    fn test_age_display_future_timestamp() {
        assert_eq!(aged(-10).age_display(), "just now");
    }

    #[test]
    fn test_age_display_minutes() {
        assert_eq!(aged(5).age_display(), "5m ago");
    }

    #[test]
    fn test_age_display_rounds_hours() {
        assert_eq!(aged(70).age_display(), "1h ago");
        assert_eq!(aged(95).age_display(), "2h ago");
    }

    #[test]
    fn test_age_display_days() {
        assert_eq!(aged(1440 * 3 + 60).age_display(), "3d ago");
        assert_eq!(aged(1440 + 13 * 60).age_display(), "2d ago");
    }
}
