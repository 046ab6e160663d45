#![forbid(unsafe_code)]

//! Turning a user-typed fragment into exactly one target.

use crate::error::WtError;
use crate::tui::picker::{Picker, PickerItem};

pub trait Candidate {
    /// Strings an exact or prefix match is checked against.
    fn keys(&self) -> Vec<String>;

    /// Line shown in pickers and ambiguity errors.
    fn label(&self) -> String;

    fn preview(&self) -> String {
        String::new()
    }
}

/// Sort key: substring hits before subsequence hits, then earlier
/// position, then tighter span.
fn match_score(query: &str, text: &str) -> Option<(u8, usize, usize)> {
    if query.is_empty() {
        return Some((0, 0, 0));
    }
    if let Some(pos) = text.find(query) {
        return Some((0, pos, 0));
    }
    let mut chars = text.char_indices();
    let mut start = None;
    let mut end = 0;
    for q in query.chars() {
        let (i, _) = chars.by_ref().find(|(_, c)| *c == q)?;
        start.get_or_insert(i);
        end = i;
    }
    let start = start.unwrap_or(0);
    Some((1, end - start, start))
}

/// Indexes of `texts` matching `query` (case-insensitive), best first.
/// Ties keep their original order.
#[must_use]
pub fn fuzzy_rank(query: &str, texts: &[String]) -> Vec<usize> {
    let query = query.trim().to_lowercase();
    let mut scored: Vec<(usize, (u8, usize, usize))> = texts
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match_score(&query, &t.to_lowercase()).map(|s| (i, s)))
        .collect();
    scored.sort_by_key(|(_, s)| *s);
    scored.into_iter().map(|(i, _)| i).collect()
}

#[must_use]
pub fn picker_items<T: Candidate>(items: &[T]) -> Vec<PickerItem> {
    items
        .iter()
        .map(|c| PickerItem {
            title: c.label(),
            preview: c.preview(),
        })
        .collect()
}

/// Resolves `fragment` against `items`.
///
/// `Ok(None)` means the user cancelled the picker. The picker is only
/// consulted when several candidates remain and it is interactive.
pub fn resolve<T: Candidate>(
    picker: &dyn Picker,
    kind: &str,
    title: &str,
    items: &[T],
    fragment: Option<&str>,
) -> Result<Option<usize>, WtError> {
    let fragment = fragment.map(str::trim).filter(|f| !f.is_empty());
    if items.is_empty() {
        return Err(WtError::not_found(kind, fragment.unwrap_or("(any)")));
    }

    let Some(frag) = fragment else {
        if items.len() == 1 && !picker.is_interactive() {
            return Ok(Some(0));
        }
        let all: Vec<usize> = (0..items.len()).collect();
        return choose(picker, kind, title, items, &all, "");
    };

    let exact: Vec<usize> = matching(items, |k| k == frag);
    if let [only] = exact.as_slice() {
        return Ok(Some(*only));
    }

    let lower = frag.to_lowercase();
    let prefixed: Vec<usize> = matching(items, |k| k.to_lowercase().starts_with(&lower));
    if let [only] = prefixed.as_slice() {
        return Ok(Some(*only));
    }

    let haystacks: Vec<String> = items.iter().map(|c| c.keys().join(" ")).collect();
    let ranked = fuzzy_rank(frag, &haystacks);
    match ranked.as_slice() {
        [] => Err(WtError::not_found(kind, frag)),
        [only] => Ok(Some(*only)),
        _ => choose(picker, kind, title, items, &ranked, frag),
    }
}

fn matching<T: Candidate>(items: &[T], pred: impl Fn(&str) -> bool) -> Vec<usize> {
    items
        .iter()
        .enumerate()
        .filter(|(_, c)| c.keys().iter().any(|k| pred(k)))
        .map(|(i, _)| i)
        .collect()
}

fn choose<T: Candidate>(
    picker: &dyn Picker,
    kind: &str,
    title: &str,
    items: &[T],
    subset: &[usize],
    query: &str,
) -> Result<Option<usize>, WtError> {
    if !picker.is_interactive() {
        return Err(WtError::AmbiguousSelection {
            kind: kind.to_owned(),
            query: query.to_owned(),
            candidates: subset.iter().map(|&i| items[i].label()).collect(),
        });
    }
    let shown: Vec<PickerItem> = subset
        .iter()
        .map(|&i| PickerItem {
            title: items[i].label(),
            preview: items[i].preview(),
        })
        .collect();
    Ok(picker.pick_one(title, &shown, query)?.map(|pos| subset[pos]))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Named(&'static str, &'static str);

    impl Candidate for Named {
        fn keys(&self) -> Vec<String> {
            vec![self.0.to_owned(), self.1.to_owned()]
        }
        fn label(&self) -> String {
            format!("{} [{}]", self.0, self.1)
        }
    }

    struct CountingPicker {
        interactive: bool,
        answer: Option<usize>,
        calls: Cell<usize>,
    }

    impl CountingPicker {
        fn new(interactive: bool, answer: Option<usize>) -> Self {
            Self {
                interactive,
                answer,
                calls: Cell::new(0),
            }
        }
    }

    impl Picker for CountingPicker {
        fn is_interactive(&self) -> bool {
            self.interactive
        }
        fn pick_one(
            &self,
            _title: &str,
            _items: &[PickerItem],
            _query: &str,
        ) -> Result<Option<usize>, WtError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.answer)
        }
        fn pick_many(
            &self,
            _title: &str,
            _items: &[PickerItem],
        ) -> Result<Option<Vec<usize>>, WtError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.answer.map(|a| vec![a]))
        }
    }

    fn items() -> Vec<Named> {
        vec![
            Named("main", "main"),
            Named("feature-x", "feature/x"),
            Named("feature-y", "feature/y"),
            Named("bugfix", "fix/login"),
        ]
    }

    #[test]
    fn ranks_substring_before_subsequence() {
        let texts: Vec<String> = ["fxabc", "abc-fx", "f-x", "zzz"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        assert_eq!(fuzzy_rank("fx", &texts), vec![0, 1, 2]);
        assert_eq!(fuzzy_rank("", &texts), vec![0, 1, 2, 3]);
        assert_eq!(fuzzy_rank("FX", &texts), vec![0, 1, 2]);
    }

    #[test]
    fn exact_and_unique_prefix_never_call_the_picker() {
        let picker = CountingPicker::new(true, Some(0));
        let items = items();
        assert_eq!(resolve(&picker, "worktree", "t", &items, Some("main")).unwrap(), Some(0));
        assert_eq!(resolve(&picker, "worktree", "t", &items, Some("BUG")).unwrap(), Some(3));
        assert_eq!(
            resolve(&picker, "worktree", "t", &items, Some("feature/y")).unwrap(),
            Some(2)
        );
        assert_eq!(resolve(&picker, "worktree", "t", &items, Some("login")).unwrap(), Some(3));
        assert_eq!(picker.calls.get(), 0);
    }

    #[test]
    fn ambiguous_fragment_is_an_error_when_not_interactive() {
        let picker = CountingPicker::new(false, None);
        let err = resolve(&picker, "worktree", "t", &items(), Some("feat")).unwrap_err();
        match err {
            WtError::AmbiguousSelection { query, candidates, .. } => {
                assert_eq!(query, "feat");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(picker.calls.get(), 0);
    }

    #[test]
    fn ambiguous_fragment_opens_picker_and_maps_back() {
        let picker = CountingPicker::new(true, Some(1));
        let got = resolve(&picker, "worktree", "t", &items(), Some("feat")).unwrap();
        assert_eq!(got, Some(2));
        assert_eq!(picker.calls.get(), 1);

        let cancel = CountingPicker::new(true, None);
        assert_eq!(resolve(&cancel, "worktree", "t", &items(), Some("feat")).unwrap(), None);
    }

    #[test]
    fn no_match_is_not_found() {
        let picker = CountingPicker::new(true, Some(0));
        let err = resolve(&picker, "worktree", "t", &items(), Some("qqq")).unwrap_err();
        assert!(matches!(err, WtError::NotFound { .. }));
    }

    #[test]
    fn no_fragment_uses_single_candidate_or_picker() {
        let picker = CountingPicker::new(false, None);
        let one = vec![Named("main", "main")];
        assert_eq!(resolve(&picker, "worktree", "t", &one, None).unwrap(), Some(0));
        assert!(resolve(&picker, "worktree", "t", &items(), None).is_err());
    }
}
