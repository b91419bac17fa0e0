//! Work items: how local image files map onto submissions.
//!
//! A [`WorkItem::Batch`] submits once per image (or once with no image).
//! A [`WorkItem::MultiSlot`] drives graphs with several image inputs:
//! slot 0 advances through its files, every other slot reuses its one
//! file on every iteration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::CoreError;
use crate::params::ImageInputSlot;

/// Files bound to one image slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBinding {
    pub node_id: String,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// One submission per path; the file goes into the first image slot.
    Batch(Vec<PathBuf>),
    /// Slots in graph order; index 0 is the iterating slot.
    MultiSlot(Vec<SlotBinding>),
}

/// One file to upload for an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotUpload {
    /// Target slot node; `None` means "the first image slot".
    pub node_id: Option<String>,
    pub path: PathBuf,
}

/// Everything needed to run one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iteration {
    pub index: usize,
    pub uploads: Vec<SlotUpload>,
    /// Local image the results are named after, if any.
    pub source: Option<PathBuf>,
}

impl WorkItem {
    /// Bind files to a multi-slot graph's image slots.
    ///
    /// `files` is keyed by slot node id. Slots without files are left
    /// untouched at submission time; keys that are not image slots of
    /// the graph are rejected.
    pub fn multi_slot(
        slots: &[ImageInputSlot],
        mut files: BTreeMap<String, Vec<PathBuf>>,
    ) -> Result<Self, CoreError> {
        let bindings: Vec<SlotBinding> = slots
            .iter()
            .map(|slot| SlotBinding {
                node_id: slot.node_id.clone(),
                files: files.remove(&slot.node_id).unwrap_or_default(),
            })
            .collect();

        if let Some(unknown) = files.keys().next() {
            return Err(CoreError::Validation(format!(
                "Node '{unknown}' is not an image input of this workflow"
            )));
        }

        Ok(Self::MultiSlot(bindings))
    }

    /// Number of submissions this item produces; always at least one.
    pub fn iteration_count(&self) -> usize {
        let n = match self {
            Self::Batch(paths) => paths.len(),
            Self::MultiSlot(slots) => slots.first().map_or(0, |s| s.files.len()),
        };
        n.max(1)
    }

    /// Describe iteration `index` (0-based).
    pub fn iteration(&self, index: usize) -> Iteration {
        match self {
            Self::Batch(paths) => {
                let path = paths.get(index).cloned();
                Iteration {
                    index,
                    uploads: path
                        .iter()
                        .map(|p| SlotUpload {
                            node_id: None,
                            path: p.clone(),
                        })
                        .collect(),
                    source: path,
                }
            }
            Self::MultiSlot(slots) => {
                let mut uploads = Vec::with_capacity(slots.len());
                let mut source = None;
                for (slot_index, slot) in slots.iter().enumerate() {
                    let file = if slot_index == 0 {
                        // Clamp to the last file once slot 0 runs out.
                        slot.files.get(index).or_else(|| slot.files.last())
                    } else {
                        slot.files.first()
                    };
                    let Some(file) = file else { continue };
                    if slot_index == 0 {
                        source = Some(file.clone());
                    }
                    uploads.push(SlotUpload {
                        node_id: Some(slot.node_id.clone()),
                        path: file.clone(),
                    });
                }
                Iteration {
                    index,
                    uploads,
                    source,
                }
            }
        }
    }

    /// All iterations in order.
    pub fn iterations(&self) -> impl Iterator<Item = Iteration> + '_ {
        (0..self.iteration_count()).map(|i| self.iteration(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn slots(ids: &[&str]) -> Vec<ImageInputSlot> {
        ids.iter()
            .map(|id| ImageInputSlot {
                node_id: id.to_string(),
                title: format!("Slot {id}"),
                input_key: "image".into(),
            })
            .collect()
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn batch_iteration_counts() {
        assert_eq!(WorkItem::Batch(vec![]).iteration_count(), 1);
        assert_eq!(WorkItem::Batch(paths(&["/a.png", "/b.png"])).iteration_count(), 2);
    }

    #[test]
    fn empty_batch_has_no_uploads_or_source() {
        let it = WorkItem::Batch(vec![]).iteration(0);
        assert!(it.uploads.is_empty());
        assert!(it.source.is_none());
    }

    #[test]
    fn multi_slot_iteration_count_follows_slot_zero() {
        for (n, expected) in [(0usize, 1usize), (1, 1), (3, 3)] {
            let mut files = BTreeMap::new();
            let slot0: Vec<PathBuf> = (0..n)
                .map(|i| PathBuf::from(format!("/in/{i}.png")))
                .collect();
            files.insert("1".to_string(), slot0);
            files.insert("2".to_string(), paths(&["/style.png"]));
            let item = WorkItem::multi_slot(&slots(&["1", "2"]), files).unwrap();
            assert_eq!(item.iteration_count(), expected);
        }
    }

    #[test]
    fn other_slots_reuse_their_fixed_file() {
        let mut files = BTreeMap::new();
        files.insert("1".to_string(), paths(&["/a.png", "/b.png", "/c.png"]));
        files.insert("2".to_string(), paths(&["/style.png"]));
        let item = WorkItem::multi_slot(&slots(&["1", "2"]), files).unwrap();

        let iterations: Vec<_> = item.iterations().collect();
        assert_eq!(iterations.len(), 3);
        for (i, it) in iterations.iter().enumerate() {
            assert_eq!(it.uploads.len(), 2);
            assert_eq!(it.uploads[1].path, PathBuf::from("/style.png"));
            assert_eq!(it.uploads[1].node_id.as_deref(), Some("2"));
            assert_eq!(it.source, Some(paths(&["/a.png", "/b.png", "/c.png"])[i].clone()));
        }
    }

    #[test]
    fn slot_zero_clamps_to_last_file() {
        let mut files = BTreeMap::new();
        files.insert("1".to_string(), paths(&["/a.png"]));
        let item = WorkItem::multi_slot(&slots(&["1", "2"]), files).unwrap();
        let it = item.iteration(4);
        assert_eq!(it.uploads.len(), 1);
        assert_eq!(it.source, Some(PathBuf::from("/a.png")));
    }

    #[test]
    fn unknown_slot_is_rejected() {
        let mut files = BTreeMap::new();
        files.insert("99".to_string(), paths(&["/a.png"]));
        assert_matches!(
            WorkItem::multi_slot(&slots(&["1", "2"]), files),
            Err(CoreError::Validation(_))
        );
    }
}
