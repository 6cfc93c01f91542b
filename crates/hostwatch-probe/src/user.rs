use hostwatch_common::types::UserMetrics;
use sysinfo::Users;

pub fn collect() -> UserMetrics {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();

    let mut metrics = UserMetrics {
        domain: std::env::var("USERDOMAIN").unwrap_or_default(),
        full_name: full_name(&username),
        sid_or_uid: String::new(),
        is_active: !username.is_empty(),
        username,
    };

    let users = Users::new_with_refreshed_list();
    if let Some(user) = users.iter().find(|u| u.name() == metrics.username) {
        metrics.sid_or_uid = user.id().to_string();
    }

    metrics
}

/// GECOS display name from the account database; empty when the platform
/// keeps no such field.
#[cfg(target_os = "linux")]
fn full_name(username: &str) -> String {
    let Ok(passwd) = std::fs::read_to_string("/etc/passwd") else {
        return String::new();
    };
    passwd
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.first() == Some(&username) && fields.len() > 4 {
                // GECOS holds comma-separated subfields; the first is the name.
                Some(fields[4].split(',').next().unwrap_or("").to_string())
            } else {
                None
            }
        })
        .next()
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn full_name(_username: &str) -> String {
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_user_is_reported() {
        let metrics = collect();
        // CI always runs with some identity.
        if !metrics.username.is_empty() {
            assert!(metrics.is_active);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_name_of_unknown_account_is_empty() {
        assert_eq!(full_name("hostwatch-no-such-user"), "");
    }
}
