use std::collections::HashMap;

use crate::tokens::TokenCounter;

/// Outcome of fitting a ranked prefix into a token budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetFit {
    /// Number of ranked items rendered.
    pub count: usize,
    /// The rendering of the first `count` items.
    pub rendered: String,
    /// Token count of `rendered`.
    pub tokens: usize,
    /// `rendered` exceeds the budget because even one item did not fit.
    pub over_budget: bool,
}

/// Find the largest `k` in `0..=total` whose rendering fits in `max_tokens`.
///
/// `render(k)` must produce the rendering of the `k` best items, and its token
/// count must be non-decreasing in `k`; the search relies on that to probe
/// only `O(log total)` prefixes. Renderings are memoized, so `render` is
/// called at most once per `k`.
///
/// When items exist but even a single one exceeds the budget, the one-item
/// rendering is returned with `over_budget` set, so a non-empty input never
/// produces an empty result.
///
/// # Examples
///
/// ```
/// use atlas_repomap::budget::fit_to_budget;
/// use atlas_repomap::tokens::CharEstimateCounter;
///
/// // Each item renders as 8 characters, i.e. 2 estimated tokens.
/// let fit = fit_to_budget(10, 7, &CharEstimateCounter, |k| "abcdefgh".repeat(k));
/// assert_eq!(fit.count, 3);
/// assert_eq!(fit.tokens, 6);
/// assert!(!fit.over_budget);
/// ```
pub fn fit_to_budget<F>(
    total: usize,
    max_tokens: usize,
    counter: &dyn TokenCounter,
    mut render: F,
) -> BudgetFit
where
    F: FnMut(usize) -> String,
{
    let mut memo: HashMap<usize, (String, usize)> = HashMap::new();
    let mut probe = |k: usize| -> usize {
        if let Some((_, tokens)) = memo.get(&k) {
            return *tokens;
        }
        let text = render(k);
        let tokens = counter.count(&text);
        memo.insert(k, (text, tokens));
        tokens
    };

    let chosen = if total == 0 || probe(total) <= max_tokens {
        total
    } else {
        // Invariant: every k < low fits, every k > high is known not to fit
        let mut best: Option<usize> = None;
        let mut low = 0usize;
        let mut high = total - 1;
        loop {
            let mid = low + (high - low) / 2;
            if probe(mid) <= max_tokens {
                best = Some(mid);
                low = mid + 1;
            } else if mid == 0 {
                break;
            } else {
                high = mid - 1;
            }
            if low > high {
                break;
            }
        }
        match best {
            Some(k) if k > 0 => k,
            _ => {
                probe(1);
                1
            }
        }
    };

    let tokens = probe(chosen);
    let rendered = memo
        .remove(&chosen)
        .map(|(text, _)| text)
        .unwrap_or_default();
    BudgetFit {
        count: chosen,
        rendered,
        tokens,
        over_budget: tokens > max_tokens,
    }
}
