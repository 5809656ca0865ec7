//! Permission translation
//!
//! Abstract capability names ("location", "camera", ...) map to concrete
//! backend permission ids. The wildcard `all` is expanded at apply time from
//! the app's manifest on Android and passed straight to `simctl privacy` on iOS.

use devrig_core::Platform;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Capability that expands to every permission the app declares
pub const WILDCARD: &str = "all";

/// Capability names accepted by `set_permissions`
pub const RECOGNIZED_CAPABILITIES: [&str; 12] = [
    "location",
    "camera",
    "contacts",
    "phone",
    "microphone",
    "bluetooth",
    "storage",
    "notifications",
    "medialibrary",
    "calendar",
    "sms",
    WILDCARD,
];

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._]+").expect("Invalid permission sanitizer regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAction {
    Grant,
    Revoke,
}

impl PermissionAction {
    /// `allow` grants; `deny`, `unset` and anything else revokes
    pub fn from_state(state: &str) -> Self {
        match state {
            "allow" => PermissionAction::Grant,
            _ => PermissionAction::Revoke,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionAction::Grant => "grant",
            PermissionAction::Revoke => "revoke",
        }
    }
}

/// Strip characters that cannot appear in a permission id
pub fn sanitize(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, "").into_owned()
}

fn android_ids(names: &[&str]) -> Vec<String> {
    names
        .iter()
        .map(|n| format!("android.permission.{}", n))
        .collect()
}

/// Concrete permission ids for one capability on `platform`
pub fn translate(platform: Platform, capability: &str) -> Vec<String> {
    match platform {
        Platform::Ios => translate_ios(capability),
        _ => translate_android(capability),
    }
}

fn translate_android(capability: &str) -> Vec<String> {
    match capability {
        "location" => android_ids(&["ACCESS_FINE_LOCATION", "ACCESS_COARSE_LOCATION"]),
        "camera" => android_ids(&["CAMERA"]),
        "contacts" => android_ids(&["READ_CONTACTS", "WRITE_CONTACTS"]),
        "phone" => android_ids(&["CALL_PHONE", "ANSWER_PHONE_CALLS"]),
        "microphone" => android_ids(&["RECORD_AUDIO"]),
        "bluetooth" => android_ids(&["BLUETOOTH_CONNECT", "BLUETOOTH_SCAN"]),
        "storage" => android_ids(&["WRITE_EXTERNAL_STORAGE", "READ_EXTERNAL_STORAGE"]),
        "notifications" => android_ids(&["POST_NOTIFICATIONS"]),
        "medialibrary" => android_ids(&[
            "WRITE_EXTERNAL_STORAGE",
            "READ_EXTERNAL_STORAGE",
            "READ_MEDIA_AUDIO",
            "READ_MEDIA_IMAGES",
            "READ_MEDIA_VIDEO",
        ]),
        "calendar" => android_ids(&["WRITE_CALENDAR", "READ_CALENDAR"]),
        "sms" => android_ids(&["READ_SMS", "RECEIVE_SMS", "SEND_SMS"]),
        other => vec![sanitize(other)],
    }
}

/// `simctl privacy` service names
fn translate_ios(capability: &str) -> Vec<String> {
    let services: &[&str] = match capability {
        "location" => &["location-always"],
        "camera" => &["camera"],
        "contacts" => &["contacts"],
        "microphone" => &["microphone"],
        "medialibrary" => &["photos", "media-library"],
        "calendar" => &["calendar"],
        WILDCARD => &[WILDCARD],
        other => return vec![sanitize(other)],
    };
    services.iter().map(|s| s.to_string()).collect()
}

/// Resolved work for one `set_permissions` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPlan {
    /// Action requested for the wildcard, to be expanded from the manifest
    pub wildcard: Option<PermissionAction>,
    /// Concrete `(permission id, action)` pairs in request order
    pub entries: Vec<(String, PermissionAction)>,
}

/// Translate a capability → state mapping into concrete work.
///
/// On iOS the wildcard is a real `simctl` service and goes into `entries`;
/// elsewhere it is pulled out for manifest expansion.
pub fn plan(platform: Platform, request: &BTreeMap<String, String>) -> PermissionPlan {
    let mut result = PermissionPlan::default();

    for (capability, state) in request {
        let action = PermissionAction::from_state(state);
        if capability == WILDCARD && platform != Platform::Ios {
            result.wildcard = Some(action);
            continue;
        }
        for id in translate(platform, capability) {
            if !id.is_empty() {
                result.entries.push((id, action));
            }
        }
    }

    result
}

/// Pair every declared manifest permission with the wildcard action
pub fn expand_wildcard(
    declared: Vec<String>,
    action: PermissionAction,
) -> Vec<(String, PermissionAction)> {
    declared.into_iter().map(|p| (p, action)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_location_expands_to_fine_and_coarse() {
        assert_eq!(
            translate(Platform::Android, "location"),
            vec![
                "android.permission.ACCESS_FINE_LOCATION",
                "android.permission.ACCESS_COARSE_LOCATION"
            ]
        );
    }

    #[test]
    fn test_medialibrary_expands_to_five_ids() {
        assert_eq!(translate(Platform::Android, "medialibrary").len(), 5);
    }

    #[test]
    fn test_unknown_capability_is_sanitized() {
        assert_eq!(
            translate(Platform::Android, "com.example.permission.MY PERM!"),
            vec!["com.example.permission.MYPERM"]
        );
    }

    #[test]
    fn test_state_translation() {
        assert_eq!(PermissionAction::from_state("allow"), PermissionAction::Grant);
        assert_eq!(PermissionAction::from_state("deny"), PermissionAction::Revoke);
        assert_eq!(PermissionAction::from_state("unset"), PermissionAction::Revoke);
        assert_eq!(PermissionAction::from_state("maybe"), PermissionAction::Revoke);
    }

    #[test]
    fn test_plan_pulls_out_wildcard_on_android() {
        let p = plan(
            Platform::Android,
            &request(&[("all", "deny"), ("camera", "allow")]),
        );
        assert_eq!(p.wildcard, Some(PermissionAction::Revoke));
        assert_eq!(
            p.entries,
            vec![(
                "android.permission.CAMERA".to_string(),
                PermissionAction::Grant
            )]
        );
    }

    #[test]
    fn test_plan_keeps_wildcard_as_service_on_ios() {
        let p = plan(Platform::Ios, &request(&[("all", "allow")]));
        assert_eq!(p.wildcard, None);
        assert_eq!(p.entries, vec![("all".to_string(), PermissionAction::Grant)]);
    }

    #[test]
    fn test_expand_wildcard() {
        let expanded = expand_wildcard(
            vec!["android.permission.CAMERA".into(), "android.permission.INTERNET".into()],
            PermissionAction::Grant,
        );
        assert_eq!(expanded.len(), 2);
        assert!(expanded.iter().all(|(_, a)| *a == PermissionAction::Grant));
    }

    #[test]
    fn test_recognized_capabilities_have_translations() {
        for capability in RECOGNIZED_CAPABILITIES {
            if capability == WILDCARD {
                continue;
            }
            let ids = translate(Platform::Android, capability);
            assert!(ids.iter().all(|id| id.starts_with("android.permission.")));
        }
    }
}
