use ecolit::config::EvChargingConfig;
use ecolit::policy::{ChargingPolicy, EnergyMetrics, MIN_AMPS, PolicyKind};

fn policy(kind: PolicyKind) -> ChargingPolicy {
    ChargingPolicy::from_config(kind, &EvChargingConfig::default())
}

fn battery(soc: f64, power: i64) -> EnergyMetrics {
    EnergyMetrics {
        battery_soc: Some(soc),
        battery_power: Some(power),
        ..EnergyMetrics::default()
    }
}

#[test]
fn eco_thresholds() {
    let eco = policy(PolicyKind::Eco);
    assert_eq!(eco.calculate_target_amps(10, &battery(98.0, 0)), 0);
    assert_eq!(eco.calculate_target_amps(10, &battery(99.2, 0)), eco.max_amps());
}

#[test]
fn hurry_starts_earlier_than_eco() {
    let metrics = battery(95.0, 200);
    assert_eq!(policy(PolicyKind::Eco).calculate_target_amps(0, &metrics), 0);
    assert!(policy(PolicyKind::Hurry).calculate_target_amps(0, &metrics) > 0);
}

#[test]
fn feedback_band_follows_battery_power() {
    let eco = policy(PolicyKind::Eco);
    for current in [MIN_AMPS, 10, 15, 20] {
        assert!(eco.calculate_target_amps(current, &battery(98.7, 200)) >= current);
        assert!(eco.calculate_target_amps(current, &battery(98.7, -200)) <= current);
        assert_eq!(eco.calculate_target_amps(current, &battery(98.7, 50)), current);
    }
}

#[test]
fn decrease_at_floor_goes_to_zero() {
    let eco = policy(PolicyKind::Eco);
    assert_eq!(eco.calculate_target_amps(MIN_AMPS, &battery(98.7, -500)), 0);
    assert_eq!(eco.calculate_target_amps(MIN_AMPS + 1, &battery(98.7, -500)), MIN_AMPS);
}

#[test]
fn emergency_ignores_metrics() {
    let emergency = policy(PolicyKind::Emergency);
    let inputs = [
        EnergyMetrics::default(),
        battery(0.0, -5000),
        battery(100.0, 5000),
        EnergyMetrics {
            grid_power_flow: Some(3000),
            ..EnergyMetrics::default()
        },
    ];
    for metrics in &inputs {
        for current in [0, MIN_AMPS, 20] {
            assert_eq!(emergency.calculate_target_amps(current, metrics), emergency.max_amps());
        }
    }
}

#[test]
fn end_to_end_examples() {
    assert_eq!(policy(PolicyKind::Eco).calculate_target_amps(10, &battery(97.0, 0)), 0);
    assert_eq!(policy(PolicyKind::Eco).calculate_target_amps(10, &battery(99.5, -200)), 9);
    assert_eq!(policy(PolicyKind::Hurry).calculate_target_amps(0, &battery(91.0, 200)), 1);
}

#[test]
fn legacy_grid_branch_only_without_battery_data() {
    let eco = policy(PolicyKind::Eco);
    let exporting = EnergyMetrics {
        grid_power_flow: Some(-500),
        ..EnergyMetrics::default()
    };
    let importing = EnergyMetrics {
        grid_power_flow: Some(100),
        ..EnergyMetrics::default()
    };
    assert_eq!(eco.calculate_target_amps(10, &exporting), 11);
    assert_eq!(eco.calculate_target_amps(10, &importing), 8);

    // Battery power alone holds instead of falling back to the grid
    let power_only = EnergyMetrics {
        battery_power: Some(-2000),
        grid_power_flow: Some(-500),
        ..EnergyMetrics::default()
    };
    assert_eq!(eco.calculate_target_amps(10, &power_only), 10);
}

#[test]
fn policy_names_parse_case_insensitively() {
    assert_eq!("eco".parse::<PolicyKind>().unwrap(), PolicyKind::Eco);
    assert_eq!("HURRY".parse::<PolicyKind>().unwrap(), PolicyKind::Hurry);
    assert_eq!("Emergency".parse::<PolicyKind>().unwrap(), PolicyKind::Emergency);
    assert!("turbo".parse::<PolicyKind>().is_err());
}
