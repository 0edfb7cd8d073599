//! Instance identity (§C4): minting `{template-name}-{8-hex}` IDs and
//! resolving a human-friendly name to the unique instance it denotes.

use crate::error::{AgoError, AgoResult};
use std::collections::HashMap;

/// Mint a fresh instance ID for `template_name`, re-rolling on the
/// vanishingly rare collision against `existing`.
pub fn mint_instance_id(template_name: &str, existing: &dyn Fn(&str) -> bool) -> AgoResult<String> {
    for _ in 0..32 {
        let suffix = random_hex8()?;
        let candidate = format!("{template_name}-{suffix}");
        if !existing(&candidate) {
            return Ok(candidate);
        }
    }
    // 32 consecutive collisions on a 32-bit space is effectively
    // impossible; treat it as an infrastructure fault rather than loop
    // forever.
    Err(AgoError::SpawnFailed {
        instance: template_name.to_string(),
        reason: "exhausted collision retries while minting an instance id".to_string(),
    })
}

fn random_hex8() -> AgoResult<String> {
    let mut bytes = [0u8; 4];
    getrandom::getrandom(&mut bytes).map_err(|e| AgoError::SpawnFailed {
        instance: "<id-mint>".to_string(),
        reason: format!("entropy source failed: {e}"),
    })?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

/// Split `id` back into its template-name prefix, e.g.
/// `"researcher-a1b2c3d4"` -> `"researcher"`.
pub fn template_name_of(instance_id: &str) -> Option<&str> {
    instance_id.rsplit_once('-').map(|(name, _)| name)
}

/// Resolve a user-typed name against the live instance set: an exact
/// instance ID match wins outright; otherwise, if `name` equals a
/// template name, the unique instance of that template is returned;
/// ambiguity is reported with every candidate ID.
pub fn resolve_agent(name: &str, live_instances: &HashMap<String, String>) -> AgoResult<String> {
    if live_instances.contains_key(name) {
        return Ok(name.to_string());
    }

    let candidates: Vec<String> = live_instances
        .iter()
        .filter(|(_, template)| template.as_str() == name)
        .map(|(id, _)| id.clone())
        .collect();

    match candidates.len() {
        0 => Err(AgoError::NoSuchAgent(name.to_string())),
        1 => Ok(candidates.into_iter().next().unwrap()),
        _ => {
            let mut sorted = candidates;
            sorted.sort();
            Err(AgoError::AmbiguousAgent { name: name.to_string(), candidates: sorted })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_have_the_expected_shape() {
        let id = mint_instance_id("researcher", &|_| false).unwrap();
        let (name, suffix) = id.rsplit_once('-').unwrap();
        assert_eq!(name, "researcher");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn successive_mints_differ() {
        let a = mint_instance_id("researcher", &|_| false).unwrap();
        let b = mint_instance_id("researcher", &|_| false).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn reroll_avoids_existing_id() {
        let mut seen = 0;
        let id = mint_instance_id("researcher", &|candidate| {
            seen += 1;
            candidate.starts_with("researcher-00000000") && seen < 2
        })
        .unwrap();
        assert!(id.starts_with("researcher-"));
    }

    #[test]
    fn exact_instance_id_resolves_directly() {
        let mut live = HashMap::new();
        live.insert("researcher-a1b2c3d4".to_string(), "researcher".to_string());
        assert_eq!(
            resolve_agent("researcher-a1b2c3d4", &live).unwrap(),
            "researcher-a1b2c3d4"
        );
    }

    #[test]
    fn unique_template_name_resolves_to_its_instance() {
        let mut live = HashMap::new();
        live.insert("researcher-a1b2c3d4".to_string(), "researcher".to_string());
        assert_eq!(resolve_agent("researcher", &live).unwrap(), "researcher-a1b2c3d4");
    }

    #[test]
    fn ambiguous_template_name_lists_candidates() {
        let mut live = HashMap::new();
        live.insert("researcher-aaaaaaaa".to_string(), "researcher".to_string());
        live.insert("researcher-bbbbbbbb".to_string(), "researcher".to_string());
        let err = resolve_agent("researcher", &live).unwrap_err();
        match err {
            AgoError::AmbiguousAgent { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected AmbiguousAgent, got {other:?}"),
        }
    }

    #[test]
    fn unknown_name_is_no_such_agent() {
        let live = HashMap::new();
        let err = resolve_agent("ghost", &live).unwrap_err();
        assert!(matches!(err, AgoError::NoSuchAgent(_)));
    }

    #[test]
    fn template_name_of_splits_on_last_hyphen() {
        assert_eq!(template_name_of("researcher-a1b2c3d4"), Some("researcher"));
        assert_eq!(template_name_of("multi-word-name-a1b2c3d4"), Some("multi-word-name"));
        assert_eq!(template_name_of("noSuffix"), None);
    }
}
