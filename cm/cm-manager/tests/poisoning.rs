//! A failed `add_compartment` leaves the manager unusable for further adds
//! and calls, while its state stays observable.
//!
//! Runs in its own test binary: the registry can be claimed once per process.

use cm_abi::CompartmentId;
use cm_elf::writer::ImageBuilder;
use cm_manager::{
    CompartmentManager, CompartmentState, FailureClass, ManagerConfig, ManagerError,
};

const RANGE_LENGTH: u64 = 0x10_0000;
const SERVER_BASE: u64 = 0x2800_0000;
const OTHER_BASE: u64 = 0x2900_0000;

fn write_image(name: &str, base: u64) -> std::path::PathBuf {
    let image = ImageBuilder::new(base)
        .start(|a| {
            a.xor_edi_edi();
            a.jmp_return();
        })
        .entry(|a| {
            a.mov_edi(42);
            a.jmp_return();
        })
        .build();
    let path = std::env::temp_dir().join(format!("cm-poison-{}-{name}", std::process::id()));
    std::fs::write(&path, image).unwrap();
    path
}

#[test]
fn first_failure_poisons_the_manager() {
    let mut manager = CompartmentManager::initialize(ManagerConfig {
        stack_size: 0x1_0000,
        ..ManagerConfig::default()
    })
    .unwrap();

    let server = write_image("server", SERVER_BASE);
    let other = write_image("other", OTHER_BASE);

    manager
        .add_compartment(CompartmentId::SERVER, &server, &[] as &[&str], RANGE_LENGTH)
        .unwrap();
    assert_eq!(manager.call(CompartmentId::SERVER, &[]).unwrap(), 42);

    // Identifiers are never reused.
    let err = manager
        .add_compartment(CompartmentId::SERVER, &other, &[] as &[&str], RANGE_LENGTH)
        .unwrap_err();
    assert!(
        matches!(err, ManagerError::AlreadyAllocated(id) if id == CompartmentId::SERVER),
        "{err}"
    );
    assert_eq!(err.class(), FailureClass::LayoutConflict);
    assert!(manager.is_poisoned());

    // Nothing else is attempted, not even for a well-formed compartment.
    assert!(matches!(
        manager.add_compartment(CompartmentId::CLIENT, &other, &[] as &[&str], RANGE_LENGTH),
        Err(ManagerError::Poisoned)
    ));
    assert_eq!(
        manager.state(CompartmentId::CLIENT).unwrap(),
        CompartmentState::Unallocated
    );
    assert!(matches!(
        manager.call(CompartmentId::SERVER, &[]),
        Err(ManagerError::Poisoned)
    ));

    // The registry is still readable.
    assert_eq!(
        manager.state(CompartmentId::SERVER).unwrap(),
        CompartmentState::SteadyState
    );
    assert!(manager.descriptor(CompartmentId::SERVER).unwrap().entry.is_tagged());

    for path in [server, other] {
        let _ = std::fs::remove_file(path);
    }
}
