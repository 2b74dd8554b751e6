//! Class-name alignment against the resolved output dimension.

use tracing::warn;

/// Force `names` to exactly `num_classes` entries.
///
/// Longer metadata is truncated; shorter or absent metadata is padded with
/// `Class_<index>` placeholders (zero-based). Total: this never fails, it
/// only adjusts data to satisfy the length invariant.
pub fn align_class_names(mut names: Vec<String>, num_classes: usize) -> Vec<String> {
    use std::cmp::Ordering;

    match names.len().cmp(&num_classes) {
        Ordering::Equal => names,
        Ordering::Greater => {
            warn!(
                metadata = names.len(),
                model = num_classes,
                "Class metadata longer than model output; truncating names"
            );
            names.truncate(num_classes);
            names
        }
        Ordering::Less => {
            if names.is_empty() {
                warn!(
                    classes = num_classes,
                    "No class-name metadata; using placeholder names"
                );
            } else {
                warn!(
                    metadata = names.len(),
                    model = num_classes,
                    "Class metadata shorter than model output; padding with placeholders"
                );
            }
            let start = names.len();
            names.extend((start..num_classes).map(|i| format!("Class_{}", i)));
            names
        }
    }
}
