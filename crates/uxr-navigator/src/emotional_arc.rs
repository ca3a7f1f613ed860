//! Peak-frustration-page computation over a session's emotional arc (§4.2).

use uxr_store::EmotionalState;

/// Given the sequence of `(page_url, emotional_state)` pairs for a session
/// in step order, returns the URL carrying the longest contiguous run of
/// frustration-family states. A frustration run breaks whenever the state
/// leaves the frustration family or the page changes mid-run. Ties keep the
/// earliest run encountered.
pub fn peak_frustration_page(arc: &[(String, EmotionalState)]) -> Option<String> {
    let mut best: Option<(String, usize)> = None;
    let mut run_url: Option<&str> = None;
    let mut run_len = 0usize;

    for (url, state) in arc {
        if !state.is_frustration_family() {
            run_url = None;
            run_len = 0;
            continue;
        }
        if run_url == Some(url.as_str()) {
            run_len += 1;
        } else {
            run_url = Some(url.as_str());
            run_len = 1;
        }
        let is_new_best = match &best {
            Some((_, best_len)) => run_len > *best_len,
            None => true,
        };
        if is_new_best {
            best = Some((url.clone(), run_len));
        }
    }

    best.map(|(url, _)| url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use EmotionalState::*;

    #[test]
    fn unit_no_frustration_states_returns_none() {
        let arc = vec![("/a".to_string(), Curious), ("/b".to_string(), Satisfied)];
        assert_eq!(peak_frustration_page(&arc), None);
    }

    #[test]
    fn functional_longest_run_on_a_single_page_wins() {
        let arc = vec![
            ("/checkout".to_string(), Frustrated),
            ("/checkout".to_string(), Confused),
            ("/checkout".to_string(), Anxious),
            ("/cart".to_string(), Frustrated),
        ];
        assert_eq!(peak_frustration_page(&arc), Some("/checkout".to_string()));
    }

    #[test]
    fn regression_run_resets_when_page_changes_mid_frustration() {
        let arc = vec![
            ("/a".to_string(), Frustrated),
            ("/b".to_string(), Frustrated),
            ("/b".to_string(), Frustrated),
        ];
        assert_eq!(peak_frustration_page(&arc), Some("/b".to_string()));
    }

    #[test]
    fn unit_neutral_state_between_runs_breaks_the_streak() {
        let arc = vec![
            ("/a".to_string(), Frustrated),
            ("/a".to_string(), Neutral),
            ("/a".to_string(), Frustrated),
        ];
        assert_eq!(peak_frustration_page(&arc), Some("/a".to_string()));
    }
}
