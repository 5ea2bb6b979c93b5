//! Multiset difference of address lists.

use std::collections::HashMap;

/// Compare `new` against `old` by occurrence count.
///
/// Strings with more occurrences in `new` go to the add list, strings with
/// more occurrences in `old` go to the delete list, equal counts cancel.
/// Each string appears at most once in the output; both lists are sorted.
pub fn diff_multiset(new: &[String], old: &[String]) -> (Vec<String>, Vec<String>) {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for ip in new {
        *counts.entry(ip.as_str()).or_default() += 1;
    }
    for ip in old {
        *counts.entry(ip.as_str()).or_default() -= 1;
    }

    let mut add = Vec::new();
    let mut del = Vec::new();
    for (ip, count) in counts {
        if count > 0 {
            add.push(ip.to_string());
        } else if count < 0 {
            del.push(ip.to_string());
        }
    }
    add.sort();
    del.sort();
    (add, del)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_diff_laws() {
        let a = ips(&["10.0.0.2", "10.0.0.1"]);
        assert_eq!(diff_multiset(&a, &a), (vec![], vec![]));
        assert_eq!(diff_multiset(&a, &[]), (ips(&["10.0.0.1", "10.0.0.2"]), vec![]));
        assert_eq!(diff_multiset(&[], &a), (vec![], ips(&["10.0.0.1", "10.0.0.2"])));
    }

    #[test]
    fn test_diff_counts_occurrences() {
        // One of two references to 10.0.0.1 goes away
        let old = ips(&["10.0.0.1", "10.0.0.1", "10.0.0.2"]);
        let new = ips(&["10.0.0.1", "10.0.0.3"]);
        let (add, del) = diff_multiset(&new, &old);
        assert_eq!(add, ips(&["10.0.0.3"]));
        assert_eq!(del, ips(&["10.0.0.1", "10.0.0.2"]));
    }

    #[test]
    fn test_diff_pool_swap() {
        let (add, del) = diff_multiset(&ips(&["10.0.1.0/24"]), &ips(&["10.0.0.0/24"]));
        assert_eq!(add, ips(&["10.0.1.0/24"]));
        assert_eq!(del, ips(&["10.0.0.0/24"]));
    }
}
