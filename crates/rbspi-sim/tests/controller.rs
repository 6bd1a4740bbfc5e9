//! Full controller stack against the simulated bus

use std::sync::mpsc;
use std::thread;

use rbspi_core::{
    Calibration, ChipSelect, Controller, Device, DeviceConfig, DividerRange, Error, Message, Mode,
    Transfer,
};
use rbspi_sim::flash::opcodes;
use rbspi_sim::{default_pins, FlashConfig, ScriptedDevice, SimBus, SimDelay, SimFlash, SimGpio};

type SimController = Controller<SimGpio, SimDelay>;

/// Each GPIO write costs 25 ns, and the calibration knows it
const TOGGLE_NS: u32 = 25;

fn sim_bus() -> SimBus {
    SimBus::new(default_pins(4)).with_toggle_ns(TOGGLE_NS)
}

fn controller(bus: &SimBus) -> SimController {
    Controller::new("sim", bus.engine().unwrap(), Calibration::new(TOGGLE_NS)).unwrap()
}

fn flash_data() -> Vec<u8> {
    (0..4096u32).map(|i| (i * 7 + 3) as u8).collect()
}

fn register(ctrl: &SimController, cs: u8, mode: Mode, hz: u32) -> Device {
    ctrl.register_device(DeviceConfig::new(cs, mode, hz)).unwrap()
}

fn cs_levels(bus: &SimBus, cs: u8) -> Vec<bool> {
    let line = bus.pins().cs_line(cs).unwrap();
    bus.line_history(line).into_iter().map(|(_, l)| l).collect()
}

fn rising_sck(bus: &SimBus) -> Vec<u64> {
    bus.line_history(bus.pins().sck)
        .into_iter()
        .filter(|&(_, high)| high)
        .map(|(at, _)| at)
        .collect()
}

fn rx_of(msg: Message, index: usize) -> Vec<u8> {
    msg.into_transfers()
        .remove(index)
        .into_rx()
        .unwrap_or_default()
}

#[test]
fn test_jedec_read_id() {
    let bus = sim_bus();
    bus.attach(0, Mode::MODE_0, SimFlash::default()).unwrap();
    let ctrl = controller(&bus);
    let flash = register(&ctrl, 0, Mode::MODE_0, 1_000_000);
    bus.clear_trace();

    let msg = Message::new(flash).with_transfer(Transfer::full_duplex(vec![opcodes::RDID], 4, 5));
    let done = ctrl.submit_and_wait(msg).unwrap();

    assert_eq!(done.status(), Ok(()));
    assert_eq!(done.actual_length(), 5);
    assert_eq!(rx_of(done, 0), vec![0xEF, 0x40, 0x15, 0xFF]);

    // Asserted once for the whole transfer, released afterwards
    assert_eq!(cs_levels(&bus, 0), vec![true, false, true]);

    // 40 clocks, none faster than 1 MHz
    let edges = rising_sck(&bus);
    assert_eq!(edges.len(), 40);
    for pair in edges.windows(2) {
        assert!(pair[1] - pair[0] >= 1_000, "{:?}", pair);
    }
}

#[test]
fn test_cs_coalesced_across_messages() {
    let bus = sim_bus();
    bus.attach(0, Mode::MODE_0, SimFlash::with_data(FlashConfig::default(), &flash_data()))
        .unwrap();
    let ctrl = controller(&bus);
    let flash = register(&ctrl, 0, Mode::MODE_0, 2_000_000);
    bus.clear_trace();

    let header = Message::new(flash)
        .with_transfer(Transfer::write(vec![opcodes::READ, 0x00, 0x01, 0x00]).with_cs_change());
    let done = ctrl.submit_and_wait(header).unwrap();
    assert_eq!(done.status(), Ok(()));
    assert_eq!(ctrl.held_chip_select(), Some(ChipSelect(0)));

    let body = Message::new(flash).with_transfer(Transfer::read(32));
    let done = ctrl.submit_and_wait(body).unwrap();
    assert_eq!(rx_of(done, 0), flash_data()[0x100..0x120].to_vec());

    assert_eq!(cs_levels(&bus, 0), vec![true, false, true]);
    assert_eq!(bus.selections(0), 1);
    assert_eq!(ctrl.held_chip_select(), None);
}

#[test]
fn test_device_switch_forces_cs_toggle() {
    let bus = sim_bus();
    let other = ScriptedDevice::new(vec![0x42]);
    bus.attach(0, Mode::MODE_0, SimFlash::default()).unwrap();
    bus.attach(1, Mode::MODE_3, other.clone()).unwrap();
    let ctrl = controller(&bus);
    let flash = register(&ctrl, 0, Mode::MODE_0, 1_000_000);
    let dev1 = register(&ctrl, 1, Mode::MODE_3, 500_000);
    bus.clear_trace();

    let hold = Message::new(flash).with_transfer(Transfer::write(vec![opcodes::RDSR]).with_cs_change());
    ctrl.submit_and_wait(hold).unwrap();

    let msg = Message::new(dev1).with_transfer(Transfer::full_duplex(vec![0x10], 1, 1));
    let done = ctrl.submit_and_wait(msg).unwrap();
    assert_eq!(rx_of(done, 0), vec![0x42]);

    let pins = bus.pins();
    let cs0 = bus.line_history(pins.cs_line(0).unwrap());
    let cs1 = bus.line_history(pins.cs_line(1).unwrap());
    let cs0_released = cs0.iter().rev().find(|(_, l)| *l).unwrap().0;
    let cs1_asserted = cs1.iter().find(|(_, l)| !*l).unwrap().0;
    assert!(cs0_released < cs1_asserted);
    assert_eq!(other.frames(), vec![vec![0x10]]);
}

#[test]
fn test_empty_message_releases_cs() {
    let bus = sim_bus();
    bus.attach(0, Mode::MODE_0, SimFlash::default()).unwrap();
    let ctrl = controller(&bus);
    let flash = register(&ctrl, 0, Mode::MODE_0, 1_000_000);

    let hold = Message::new(flash).with_transfer(Transfer::write(vec![opcodes::WREN]).with_cs_change());
    ctrl.submit_and_wait(hold).unwrap();
    let cs0 = bus.pins().cs_line(0).unwrap();
    assert!(!bus.levels().contains(cs0));

    let done = ctrl.submit_and_wait(Message::new(flash)).unwrap();
    assert_eq!(done.status(), Ok(()));
    assert_eq!(done.actual_length(), 0);
    assert!(bus.levels().contains(cs0));
    assert_eq!(ctrl.held_chip_select(), None);
}

#[test]
fn test_fifo_per_device() {
    let bus = sim_bus();
    let slaves = [ScriptedDevice::new(vec![]), ScriptedDevice::new(vec![])];
    for (cs, slave) in slaves.iter().enumerate() {
        bus.attach(cs as u8, Mode::MODE_0, slave.clone()).unwrap();
    }
    let ctrl = controller(&bus);
    let devs = [
        register(&ctrl, 0, Mode::MODE_0, 4_000_000),
        register(&ctrl, 1, Mode::MODE_0, 4_000_000),
    ];

    let (tx, rx) = mpsc::channel();
    for seq in 0..20u8 {
        let cs = (seq % 2) as usize;
        let tx = tx.clone();
        let msg = Message::new(devs[cs])
            .with_transfer(Transfer::write(vec![seq]))
            .with_completion(move |m| tx.send((m.device().chip_select(), seq)).unwrap());
        ctrl.submit(msg);
    }

    let order: Vec<(ChipSelect, u8)> = (0..20).map(|_| rx.recv().unwrap()).collect();
    for cs in 0..2u8 {
        let seen: Vec<u8> = order
            .iter()
            .filter(|(c, _)| *c == ChipSelect(cs))
            .map(|&(_, s)| s)
            .collect();
        let expected: Vec<u8> = (0..20u8).filter(|s| s % 2 == cs).collect();
        assert_eq!(seen, expected);

        let frames: Vec<Vec<u8>> = expected.iter().map(|&s| vec![s]).collect();
        assert_eq!(slaves[cs as usize].frames(), frames);
    }
}

#[test]
fn test_concurrent_submitters() {
    let bus = sim_bus();
    let slaves = [ScriptedDevice::new(vec![0x5A]), ScriptedDevice::new(vec![0xA5])];
    for (cs, slave) in slaves.iter().enumerate() {
        bus.attach(cs as u8, Mode::MODE_0, slave.clone()).unwrap();
    }
    let ctrl = controller(&bus);
    let devs = [
        register(&ctrl, 0, Mode::MODE_0, 8_000_000),
        register(&ctrl, 1, Mode::MODE_0, 8_000_000),
    ];

    thread::scope(|s| {
        for (cs, dev) in devs.iter().enumerate() {
            let ctrl = &ctrl;
            s.spawn(move || {
                let expected = if cs == 0 { 0x5A } else { 0xA5 };
                for i in 0..10u8 {
                    let msg = Message::new(*dev).with_transfer(Transfer::full_duplex(vec![i], 1, 1));
                    let done = ctrl.submit_and_wait(msg).unwrap();
                    assert_eq!(rx_of(done, 0), vec![expected]);
                }
            });
        }
    });

    for slave in &slaves {
        let frames: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
        assert_eq!(slave.frames(), frames);
    }
}

#[test]
fn test_verify_short_circuits() {
    let bus = sim_bus();
    let data = flash_data();
    bus.attach(0, Mode::MODE_0, SimFlash::with_data(FlashConfig::default(), &data))
        .unwrap();
    let ctrl = controller(&bus);
    let flash = register(&ctrl, 0, Mode::MODE_0, 1_000_000);

    let read_cmd = || Transfer::write(vec![opcodes::READ, 0, 0, 0]);

    let good = Message::new(flash)
        .with_transfer(read_cmd())
        .with_transfer(Transfer::verify(None, data[..16].to_vec()));
    let done = ctrl.submit_and_wait(good).unwrap();
    assert_eq!(done.status(), Ok(()));
    assert_eq!(done.actual_length(), 20);

    let mut expected = data[..16].to_vec();
    expected[5] ^= 0xFF;
    bus.clear_trace();
    let bad = Message::new(flash)
        .with_transfer(read_cmd())
        .with_transfer(Transfer::verify(None, expected))
        .with_transfer(Transfer::write(vec![0; 8]));
    let done = ctrl.submit_and_wait(bad).unwrap();
    assert_eq!(done.status(), Err(Error::TransferSizeMismatch));
    assert_eq!(done.actual_length(), 4 + 5);

    // Clocking stopped after the mismatching byte and CS was released
    assert_eq!(rising_sck(&bus).len(), (4 + 6) * 8);
    assert_eq!(cs_levels(&bus, 0), vec![true, false, true]);
}

#[test]
fn test_all_modes_against_slaves() {
    let bus = sim_bus();
    let modes = [
        Mode::MODE_1,
        Mode::MODE_2,
        Mode::MODE_3,
        Mode::MODE_0 | Mode::LSB_FIRST,
    ];
    let slaves: Vec<ScriptedDevice> = (0..4)
        .map(|_| ScriptedDevice::new(vec![0xC3, 0x18, 0x7E]))
        .collect();
    for (cs, (mode, slave)) in modes.iter().zip(&slaves).enumerate() {
        bus.attach(cs as u8, *mode, slave.clone()).unwrap();
    }
    let ctrl = controller(&bus);

    for (cs, mode) in modes.iter().enumerate() {
        let dev = register(&ctrl, cs as u8, *mode, 1_000_000);
        let msg = Message::new(dev).with_transfer(Transfer::full_duplex(vec![0x01, 0x80, 0x55], 3, 3));
        let done = ctrl.submit_and_wait(msg).unwrap();
        assert_eq!(rx_of(done, 0), vec![0xC3, 0x18, 0x7E], "{:?}", mode);
        assert_eq!(slaves[cs].frames(), vec![vec![0x01, 0x80, 0x55]], "{:?}", mode);
    }
}

#[test]
fn test_cs_high_device() {
    let bus = sim_bus();
    let slave = ScriptedDevice::new(vec![0x99]);
    let mode = Mode::MODE_0 | Mode::CS_HIGH;
    // The engine parks every CS high until the device is registered, so
    // attach afterwards to keep that out of the slave's recording
    let ctrl = controller(&bus);
    bus.attach(2, mode, slave.clone()).unwrap();
    let dev = register(&ctrl, 2, mode, 1_000_000);
    let cs2 = bus.pins().cs_line(2).unwrap();
    assert!(!bus.levels().contains(cs2));

    let done = ctrl
        .submit_and_wait(Message::new(dev).with_transfer(Transfer::full_duplex(vec![0x11], 1, 1)))
        .unwrap();
    assert_eq!(rx_of(done, 0), vec![0x99]);
    assert_eq!(slave.frames(), vec![vec![0x11]]);
    assert!(!bus.levels().contains(cs2));
}

#[test]
fn test_speed_override_per_transfer() {
    let bus = sim_bus();
    bus.attach(0, Mode::MODE_0, ScriptedDevice::new(vec![])).unwrap();
    let ctrl = controller(&bus);
    let dev = register(&ctrl, 0, Mode::MODE_0, 1_000_000);
    bus.clear_trace();

    let msg = Message::new(dev)
        .with_transfer(Transfer::write(vec![0xAA]).with_speed_hz(100_000))
        .with_transfer(Transfer::write(vec![0x55]));
    ctrl.submit_and_wait(msg).unwrap();

    let edges = rising_sck(&bus);
    assert_eq!(edges.len(), 16);
    for pair in edges[..8].windows(2) {
        assert!(pair[1] - pair[0] >= 10_000);
    }
    for pair in edges[8..].windows(2) {
        let gap = pair[1] - pair[0];
        assert!((1_000..10_000).contains(&gap), "{}", gap);
    }
}

/// Read 256 bytes from a flash through `ctrl`
fn read_flash(ctrl: &SimController, dev: Device) -> Vec<u8> {
    let msg = Message::new(dev)
        .with_transfer(Transfer::write(vec![opcodes::READ, 0, 0, 0x10]))
        .with_transfer(Transfer::read(256));
    let done = ctrl.submit_and_wait(msg).unwrap();
    assert_eq!(done.status(), Ok(()));
    rx_of(done, 1)
}

#[test]
fn test_shift_register_matches_bitbang() {
    let data = flash_data();
    let divider = DividerRange {
        base_hz: 100_000_000,
        min: 2,
        max: 255,
    };

    // Same flash image on two buses, one with a shift register
    let fast_bus = sim_bus();
    fast_bus
        .attach(0, Mode::MODE_0, SimFlash::with_data(FlashConfig::default(), &data))
        .unwrap();
    let engine = fast_bus
        .engine()
        .unwrap()
        .with_shift_register(fast_bus.shift_register(divider.base_hz));
    let fast = Controller::new(
        "fast",
        engine,
        Calibration::new(TOGGLE_NS).with_divider(divider),
    )
    .unwrap();
    let fast_dev = register(&fast, 0, Mode::MODE_0, 10_000_000);

    let slow_bus = sim_bus();
    slow_bus
        .attach(0, Mode::MODE_0, SimFlash::with_data(FlashConfig::default(), &data))
        .unwrap();
    let slow = controller(&slow_bus);
    let slow_dev = register(&slow, 0, Mode::MODE_0, 10_000_000);

    let via_words = read_flash(&fast, fast_dev);
    let via_bits = read_flash(&slow, slow_dev);
    assert_eq!(via_words, via_bits);
    assert_eq!(via_words, data[0x10..0x110].to_vec());
    assert_eq!(fast_bus.hw_words(), 1 + 64);
    assert_eq!(slow_bus.hw_words(), 0);
}

#[test]
fn test_no_fast_path_device_bitbangs() {
    let divider = DividerRange {
        base_hz: 100_000_000,
        min: 2,
        max: 255,
    };
    let bus = sim_bus();
    bus.attach(0, Mode::MODE_0, SimFlash::with_data(FlashConfig::default(), &flash_data()))
        .unwrap();
    let engine = bus
        .engine()
        .unwrap()
        .with_shift_register(bus.shift_register(divider.base_hz));
    let ctrl = Controller::new("slow", engine, Calibration::new(TOGGLE_NS).with_divider(divider))
        .unwrap();
    let dev = ctrl
        .register_device(DeviceConfig::new(0, Mode::MODE_0, 10_000_000).without_fast_path())
        .unwrap();

    assert_eq!(read_flash(&ctrl, dev), flash_data()[0x10..0x110].to_vec());
    assert_eq!(bus.hw_words(), 0);
}

#[test]
fn test_atomic_submit_releases_held_cs() {
    let bus = sim_bus();
    let other = ScriptedDevice::new(vec![0x77]);
    bus.attach(0, Mode::MODE_0, SimFlash::default()).unwrap();
    bus.attach(1, Mode::MODE_0, other.clone()).unwrap();
    let ctrl = controller(&bus);
    let flash = register(&ctrl, 0, Mode::MODE_0, 1_000_000);
    let dev1 = register(&ctrl, 1, Mode::MODE_0, 1_000_000);

    let hold = Message::new(flash).with_transfer(Transfer::write(vec![opcodes::RDSR]).with_cs_change());
    ctrl.submit_and_wait(hold).unwrap();
    assert_eq!(ctrl.held_chip_select(), Some(ChipSelect(0)));

    let done = ctrl.submit_atomic(Message::new(dev1).with_transfer(Transfer::full_duplex(vec![0x01], 1, 1)));
    assert_eq!(done.status(), Ok(()));
    assert_eq!(rx_of(done, 0), vec![0x77]);

    let cs0 = bus.pins().cs_line(0).unwrap();
    assert!(bus.levels().contains(cs0));
    assert_eq!(ctrl.held_chip_select(), None);
    assert_eq!(other.frames(), vec![vec![0x01]]);
}

#[test]
fn test_drop_releases_held_cs() {
    let bus = sim_bus();
    bus.attach(0, Mode::MODE_0, SimFlash::default()).unwrap();
    let ctrl = controller(&bus);
    let flash = register(&ctrl, 0, Mode::MODE_0, 1_000_000);

    let hold = Message::new(flash).with_transfer(Transfer::write(vec![opcodes::RDSR]).with_cs_change());
    ctrl.submit_and_wait(hold).unwrap();
    let cs0 = bus.pins().cs_line(0).unwrap();
    assert!(!bus.levels().contains(cs0));

    drop(ctrl);
    assert!(bus.levels().contains(cs0));
}

#[test]
fn test_program_and_read_back() {
    let bus = sim_bus();
    bus.attach(0, Mode::MODE_0, SimFlash::default()).unwrap();
    let ctrl = controller(&bus);
    let flash = register(&ctrl, 0, Mode::MODE_0, 2_000_000);

    // WREN and PP as two CS frames in one Message
    let program = Message::new(flash)
        .with_transfer(Transfer::write(vec![opcodes::WREN]).with_cs_change())
        .with_transfer(Transfer::write(vec![opcodes::PP, 0, 0x20, 0, 0xDE, 0xAD]));
    assert_eq!(ctrl.submit_and_wait(program).unwrap().status(), Ok(()));

    let read = Message::new(flash)
        .with_transfer(Transfer::write(vec![opcodes::READ, 0, 0x20, 0]))
        .with_transfer(Transfer::read(3));
    let done = ctrl.submit_and_wait(read).unwrap();
    assert_eq!(rx_of(done, 1), vec![0xDE, 0xAD, 0xFF]);
    assert_eq!(bus.selections(0), 3);
}
