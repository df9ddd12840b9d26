//! Target filter expansion
//!
//! Turns a specification's target filter into the concrete set of targets a
//! request will run against, taking registry holds along the way. Expansion
//! is all-or-nothing: any failure releases every hold taken so far and the
//! start call rejects with no partial state.

use crate::context::LbaWindow;
use crate::error::StartError;
use crate::spec::validator::validate_lba_range;
use crate::spec::{IoSpec, TargetFilter, TargetIdentity, MAX_THREADS_PER_SPEC};
use crate::target::registry::TargetRegistry;
use crate::target::Target;
use crate::topology::Topology;
use std::sync::Arc;

/// One target a request expands onto.
pub struct ExpandedTarget {
    pub target: Arc<Target>,
    pub threads: u32,
    pub window: LbaWindow,
    pub playback: bool,
}

/// Expand the filter, take one registry hold per context-target pairing, and
/// re-run the range validation against each target's real capacity.
///
/// Caller holds the service lock, which is what makes the taken holds safe
/// against concurrent release.
pub fn expand_filter(
    spec: &IoSpec,
    registry: &mut TargetRegistry,
    topology: &dyn Topology,
) -> Result<Vec<ExpandedTarget>, StartError> {
    let (matched, playback): (Vec<(TargetIdentity, u32)>, bool) = match &spec.filter {
        TargetFilter::Target(identity) => (vec![(identity.clone(), spec.threads)], false),

        TargetFilter::Class(class_id) => {
            let members: Vec<_> = topology
                .enumerate_class(*class_id)
                .into_iter()
                .filter(|d| !d.is_system)
                .map(|d| (d.identity, spec.threads))
                .collect();
            if members.is_empty() {
                return Err(StartError::NoObjects);
            }
            (members, false)
        }

        TargetFilter::Group(group) => {
            let members: Vec<_> = topology
                .enumerate_group(group)
                .into_iter()
                .map(|d| (d.identity, spec.threads))
                .collect();
            if members.is_empty() {
                return Err(StartError::NoObjects);
            }
            (members, false)
        }

        TargetFilter::Playback(entries) => {
            if entries.is_empty() {
                return Err(StartError::NoObjects);
            }
            for entry in entries {
                if entry.threads == 0 || entry.threads > MAX_THREADS_PER_SPEC {
                    return Err(StartError::Validation(format!(
                        "playback entry for {} has thread count {} out of range 1..={}",
                        entry.identity, entry.threads, MAX_THREADS_PER_SPEC
                    )));
                }
            }
            (
                entries
                    .iter()
                    .map(|e| (e.identity.clone(), e.threads))
                    .collect(),
                true,
            )
        }
    };

    let mut expanded: Vec<ExpandedTarget> = Vec::with_capacity(matched.len());
    let release_all = |registry: &mut TargetRegistry, expanded: &[ExpandedTarget]| {
        for e in expanded {
            registry.release(&e.target);
        }
    };

    for (identity, threads) in matched {
        let target = match registry.get_or_create(&identity, topology) {
            Ok(target) => target,
            Err(err) => {
                release_all(registry, &expanded);
                return Err(err);
            }
        };

        if let Err(err) = check_target(spec, threads, &target) {
            registry.release(&target);
            release_all(registry, &expanded);
            return Err(err);
        }

        let window = LbaWindow::resolve(
            spec.min_lba,
            spec.start_lba,
            spec.max_lba,
            target.capacity_blocks(),
        );
        expanded.push(ExpandedTarget {
            target,
            threads,
            window,
            playback,
        });
    }

    Ok(expanded)
}

/// Per-target checks that need the resolved descriptor: alignment against the
/// optimum transfer size and the range rules with capacity substituted in.
fn check_target(spec: &IoSpec, threads: u32, target: &Arc<Target>) -> Result<(), StartError> {
    if spec.alignment_blocks > 0 && spec.alignment_blocks < target.optimum_block_size() {
        return Err(StartError::Validation(format!(
            "alignment {:#x} below optimum block size {:#x} of {}",
            spec.alignment_blocks,
            target.optimum_block_size(),
            target.identity()
        )));
    }

    let window = LbaWindow::resolve(
        spec.min_lba,
        spec.start_lba,
        spec.max_lba,
        target.capacity_blocks(),
    );
    // Playback entries carry their own thread counts.
    let mut resolved = spec.clone();
    resolved.threads = threads;
    validate_lba_range(&resolved, window.min_lba, window.start_lba, window.max_lba)
}
