//! Arbiter acquisition behavior against a recording bus

use std::time::Duration;
use xcvr::testing::{MockI2cBus, ScriptedRead};
use xcvr::{BusArbiter, Error, Ownership};

const ARBITER: u8 = 0x74;

fn read(raw: u8) -> ScriptedRead {
    ScriptedRead::Data(vec![raw])
}

#[test]
fn test_acquire_noop_when_already_owned() {
    let mut bus = MockI2cBus::new();
    // BUSON set, MYBUS mirrors NMYBUS: owned and powered.
    bus.default_read = Some(vec![0x04]);

    let arbiter = BusArbiter::new(ARBITER);
    arbiter.acquire(&mut bus).unwrap();

    // Only the register-pointer write went out; no takeover.
    assert_eq!(bus.writes_to(ARBITER), vec![&[0x01][..]]);
}

#[test]
fn test_acquire_takes_over_step_by_step() {
    let mut bus = MockI2cBus::new();
    // Other master holds a powered-off bus, then our write lands, then the
    // bus comes up owned.
    bus.read_script.push_back(read(0x01));
    bus.read_script.push_back(read(0x00));
    bus.read_script.push_back(read(0x04));

    let arbiter = BusArbiter::new(ARBITER);
    arbiter.acquire(&mut bus).unwrap();

    let writes = bus.writes_to(ARBITER);
    // pointer, takeover, pointer, takeover, pointer
    assert_eq!(
        writes,
        vec![
            &[0x01][..],
            &[0x01, 0x00][..],
            &[0x01][..],
            &[0x01, 0x04][..],
            &[0x01][..],
        ]
    );
}

#[test]
fn test_acquire_waits_out_bus_init() {
    let mut bus = MockI2cBus::new();
    bus.read_script.push_back(read(0x10));
    bus.read_script.push_back(read(0x10));
    bus.read_script.push_back(read(0x04));

    let arbiter = BusArbiter::new(ARBITER);
    arbiter.acquire(&mut bus).unwrap();

    // Initialization rounds never write the control register.
    assert!(bus.writes_to(ARBITER).iter().all(|w| w.len() == 1));
}

#[test]
fn test_acquire_converges_once_takeover_write_lands() {
    let mut bus = MockI2cBus::new();
    // Both BUSON mirror bits set: the bus looks unpowered and not ours.
    // The table maps this state straight to 0x04; once that write lands
    // the next read shows an owned, powered bus.
    bus.read_script.push_back(read(0x0d));
    bus.read_script.push_back(read(0x04));

    let arbiter = BusArbiter::new(ARBITER);
    arbiter.acquire(&mut bus).unwrap();
    assert_eq!(
        bus.writes_to(ARBITER),
        vec![&[0x01][..], &[0x01, 0x04][..], &[0x01][..]]
    );
}

#[test]
fn test_acquire_attempts_are_bounded() {
    let mut bus = MockI2cBus::new();
    // The other master wins every round: the register never moves off
    // "theirs" no matter what we write.
    bus.default_read = Some(vec![0x01]);

    let arbiter = BusArbiter::new(ARBITER).with_retries(5, Duration::from_micros(100));
    let err = arbiter.acquire(&mut bus).unwrap_err();
    assert!(matches!(err, Error::Arbitration { attempts: 5 }));

    // One takeover write per attempt, no more.
    let takeovers = bus
        .writes_to(ARBITER)
        .iter()
        .filter(|w| w.len() == 2)
        .count();
    assert_eq!(takeovers, 5);
}

#[test]
fn test_ownership_query_is_read_only() {
    let arbiter = BusArbiter::new(ARBITER);

    let mut bus = MockI2cBus::new();
    bus.default_read = Some(vec![0x04]);
    assert_eq!(arbiter.ownership(&mut bus).unwrap(), Ownership::Owned);

    let mut bus = MockI2cBus::new();
    bus.default_read = Some(vec![0x01]);
    assert_eq!(arbiter.ownership(&mut bus).unwrap(), Ownership::NotOwned);

    // Owned but unpowered still counts as not ours to use.
    let mut bus = MockI2cBus::new();
    bus.default_read = Some(vec![0x00]);
    assert_eq!(arbiter.ownership(&mut bus).unwrap(), Ownership::NotOwned);

    let mut bus = MockI2cBus::new();
    bus.default_read = Some(vec![0x10]);
    assert_eq!(
        arbiter.ownership(&mut bus).unwrap(),
        Ownership::Indeterminate
    );

    // Never more than the pointer write.
    assert!(bus.writes_to(ARBITER).iter().all(|w| w.len() == 1));
}

#[test]
fn test_acquire_propagates_bus_errors() {
    let mut bus = MockI2cBus::new();
    bus.read_script.push_back(ScriptedRead::Timeout);

    let arbiter = BusArbiter::new(ARBITER);
    assert!(matches!(
        arbiter.acquire(&mut bus).unwrap_err(),
        Error::TransferTimeout { .. }
    ));
}
