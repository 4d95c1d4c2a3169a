#![no_main]
use ecolit::clock::ManualClock;
use ecolit::config::EvChargingConfig;
use ecolit::controller::ChargingRateController;
use ecolit::policy::{EnergyMetrics, MIN_AMPS, PolicyKind};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let Some((&head, rest)) = data.split_first() else {
        return;
    };
    let policy = PolicyKind::ALL[usize::from(head) % PolicyKind::ALL.len()];
    let config = EvChargingConfig {
        enabled: true,
        policy,
        max_amps: MIN_AMPS + u32::from(head % 27),
        ..EvChargingConfig::default()
    };
    let clock = Arc::new(ManualClock::default());
    let Ok(mut controller) = ChargingRateController::new(&config, clock.clone()) else {
        return;
    };

    // Six bytes per reading: flags, soc, battery power, grid power
    for chunk in rest.chunks_exact(6) {
        let flags = chunk[0];
        let soc = f64::from(chunk[1]) * 100.0 / 255.0;
        let battery = i64::from(i16::from_be_bytes([chunk[2], chunk[3]]));
        let grid = i64::from(i16::from_be_bytes([chunk[4], chunk[5]]));
        let metrics = EnergyMetrics {
            battery_soc: (flags & 1 != 0).then_some(soc),
            battery_power: (flags & 2 != 0).then_some(battery),
            grid_power_flow: (flags & 4 != 0).then_some(grid),
            solar_power: None,
        };
        clock.advance_secs(f64::from(flags >> 3) * 4.0);

        let amps = controller.calculate(&metrics);
        assert!(amps == 0 || (MIN_AMPS..=config.max_amps).contains(&amps));
        if policy == PolicyKind::Emergency {
            assert_eq!(amps, config.max_amps);
        }
    }
});
