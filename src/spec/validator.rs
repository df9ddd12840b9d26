//! Specification validation
//!
//! Every start request passes through here before any allocation or target
//! lookup happens. A rejected specification leaves no state behind.

use super::*;
use crate::error::StartError;

/// Validate a complete specification.
///
/// The LBA-range rules are skipped when `max_lba` is `LBA_INVALID`, because
/// the real range is not known until the target's capacity is resolved; the
/// same checks re-run per target during expansion.
pub fn validate_spec(spec: &IoSpec) -> Result<(), StartError> {
    if spec.threads == 0 || spec.threads > MAX_THREADS_PER_SPEC {
        return Err(StartError::Validation(format!(
            "thread count {} out of range 1..={}",
            spec.threads, MAX_THREADS_PER_SPEC
        )));
    }

    if spec.min_blocks == 0 || spec.max_blocks == 0 {
        return Err(StartError::Validation(format!(
            "zero block count: min {:#x} max {:#x}",
            spec.min_blocks, spec.max_blocks
        )));
    }

    if spec.min_blocks > spec.max_blocks {
        return Err(StartError::Validation(format!(
            "min_blocks {:#x} > max_blocks {:#x}",
            spec.min_blocks, spec.max_blocks
        )));
    }

    if spec.block_spec == BlockSpec::Constant && spec.min_blocks != spec.max_blocks {
        return Err(StartError::Validation(format!(
            "constant block spec requires min == max, got {:#x}..{:#x}",
            spec.min_blocks, spec.max_blocks
        )));
    }

    if spec.start_lba > spec.max_lba {
        return Err(StartError::Validation(format!(
            "start_lba {:#x} > max_lba {:#x}",
            spec.start_lba, spec.max_lba
        )));
    }

    if spec.min_lba > spec.max_lba {
        return Err(StartError::Validation(format!(
            "min_lba {:#x} > max_lba {:#x}",
            spec.min_lba, spec.max_lba
        )));
    }

    // The device interface only carries plain reads and writes.
    if spec.interface == IoInterface::Device
        && !matches!(spec.operation, OperationKind::Read | OperationKind::Write)
    {
        return Err(StartError::Validation(format!(
            "operation {:?} not supported over the device interface",
            spec.operation
        )));
    }

    // A shared cursor cannot be coordinated through the device interface.
    if spec.interface == IoInterface::Device && spec.addressing.is_caterpillar() {
        return Err(StartError::Validation(
            "caterpillar addressing not supported over the device interface".to_string(),
        ));
    }

    // Caterpillar cursors cannot be shared across heterogeneous capacities.
    if spec.filter.is_multi_target() && spec.addressing.is_caterpillar() {
        return Err(StartError::Validation(
            "caterpillar addressing cannot expand over multiple targets".to_string(),
        ));
    }

    if spec.max_lba != LBA_INVALID {
        validate_lba_range(spec, spec.min_lba, spec.start_lba, spec.max_lba)?;
    }

    Ok(())
}

/// Validate a concrete LBA range against the block counts and thread count.
///
/// Called from `validate_spec` when the spec carries explicit bounds, and
/// again per target once `LBA_INVALID` bounds have been replaced with the
/// target's capacity.
pub fn validate_lba_range(
    spec: &IoSpec,
    min_lba: u64,
    start_lba: u64,
    max_lba: u64,
) -> Result<(), StartError> {
    // Increasing block counts deliberately run past the nominal range, so
    // the range checks do not apply to them.
    if spec.block_spec == BlockSpec::Increasing {
        return Ok(());
    }

    let start_range = max_lba - start_lba + 1;
    if start_range < spec.max_blocks || start_range < spec.min_blocks {
        return Err(StartError::Validation(format!(
            "start range {:#x} cannot hold blocks {:#x}..{:#x}",
            start_range, spec.min_blocks, spec.max_blocks
        )));
    }

    let range = max_lba - min_lba + 1;
    if range < spec.max_blocks || range < spec.min_blocks {
        return Err(StartError::Validation(format!(
            "lba range {:#x} cannot hold blocks {:#x}..{:#x}",
            range, spec.min_blocks, spec.max_blocks
        )));
    }

    // Every thread needs room for at least one minimum-size operation, or
    // some threads could never compete in the range.
    if range / spec.min_blocks < spec.threads as u64 {
        return Err(StartError::Validation(format!(
            "lba range {:#x} with min_blocks {:#x} cannot support {} threads",
            range, spec.min_blocks, spec.threads
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> IoSpec {
        let mut spec = IoSpec::for_target(
            TargetIdentity::Object { id: 0x10, namespace: 0 },
            OperationKind::Read,
        );
        spec.max_lba = 0xFFF;
        spec
    }

    #[test]
    fn test_valid_spec_accepted() {
        assert!(validate_spec(&base_spec()).is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut spec = base_spec();
        spec.threads = 0;
        assert!(matches!(
            validate_spec(&spec),
            Err(StartError::Validation(_))
        ));
    }

    #[test]
    fn test_thread_cap_rejected() {
        let mut spec = base_spec();
        spec.threads = MAX_THREADS_PER_SPEC + 1;
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_zero_min_blocks_rejected() {
        let mut spec = base_spec();
        spec.min_blocks = 0;
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_inverted_block_range_rejected() {
        let mut spec = base_spec();
        spec.block_spec = BlockSpec::RandomRange;
        spec.min_blocks = 8;
        spec.max_blocks = 4;
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_range_smaller_than_max_blocks_rejected() {
        let mut spec = base_spec();
        spec.block_spec = BlockSpec::Constant;
        spec.min_blocks = 0x2000;
        spec.max_blocks = 0x2000;
        // max_lba - min_lba + 1 == 0x1000 < max_blocks
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_range_too_small_for_threads_rejected() {
        let mut spec = base_spec();
        spec.max_lba = 63;
        spec.min_blocks = 1;
        spec.max_blocks = 1;
        spec.block_spec = BlockSpec::Constant;
        // 64 usable LBAs / 1 block minimum < 128 threads
        spec.threads = 128;
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_increasing_block_spec_skips_range_rules() {
        let mut spec = base_spec();
        spec.block_spec = BlockSpec::Increasing;
        spec.min_blocks = 1;
        spec.max_blocks = 0x10000; // larger than the range, allowed here
        assert!(validate_spec(&spec).is_ok());
    }

    #[test]
    fn test_caterpillar_multi_target_rejected() {
        let mut spec = base_spec();
        spec.filter = TargetFilter::Class(7);
        spec.addressing = AddressingMode::CaterpillarIncreasing;
        assert!(validate_spec(&spec).is_err());

        spec.addressing = AddressingMode::CaterpillarDecreasing;
        spec.filter = TargetFilter::Group(TargetIdentity::Object { id: 2, namespace: 0 });
        assert!(validate_spec(&spec).is_err());
    }

    #[test]
    fn test_device_interface_limits_operations() {
        let mut spec = base_spec();
        spec.interface = IoInterface::Device;
        spec.operation = OperationKind::WriteReadCheck;
        assert!(validate_spec(&spec).is_err());

        spec.operation = OperationKind::Write;
        assert!(validate_spec(&spec).is_ok());
    }

    #[test]
    fn test_inverted_lba_bounds_rejected() {
        let mut spec = base_spec();
        spec.min_lba = 0x100;
        spec.max_lba = 0x80;
        spec.start_lba = 0x10;
        assert!(validate_spec(&spec).is_err());
    }
}
