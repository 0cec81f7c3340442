//! Host-side tests over model descriptions and the reference stepper.

use ringkernel_membrane::kernel::{assemble_source, reflect};
use ringkernel_membrane::prelude::*;

const PLATE: &str = include_str!("../models/plate.json");

fn coefficients_of(description: &ModelDescription) -> MembraneCoefficients {
    let controller = description.controller().unwrap();
    let get = |name: &str| controller.coefficients.get(name).copied().unwrap_or(0.0);
    MembraneCoefficients {
        lambda_one: get("lambda_one"),
        mu_one: get("mu_one"),
        lambda_two: get("lambda_two"),
        mu_two: get("mu_two"),
    }
}

#[test]
fn test_sample_plate_parses() {
    let description = ModelDescription::from_json(PLATE).unwrap();
    assert_eq!(description.width(), 24);
    assert_eq!(description.height(), 16);
    assert_eq!(description.physics_kernel().unwrap(), DEFAULT_MEMBRANE_KERNEL);

    let ids = description.region_grid().unwrap();
    assert_eq!(ids[(0, 0)], 0);
    assert_eq!(ids[(4, 8)], 1);
    assert_eq!(ids[(16, 6)], 2);
}

#[test]
fn test_sample_plate_coefficients_match_kernel() {
    let description = ModelDescription::from_json(PLATE).unwrap();
    let source = assemble_source(
        description.width(),
        description.height(),
        description.physics_kernel().unwrap(),
    );
    let layout = reflect(&source, "fdtd_kernel").unwrap();

    let controller = description.controller().unwrap();
    assert_eq!(controller.coefficients.len(), layout.coefficients.len());
    for name in controller.coefficients.keys() {
        assert!(layout.coefficients.slot(name).is_some(), "{name} not declared");
    }
    assert!(coefficients_of(&description).is_stable());
}

#[test]
fn test_sample_plate_boundary() {
    let description = ModelDescription::from_json(PLATE).unwrap();
    let ids = description.region_grid().unwrap();
    let model = Model::from_region_grid(&ids, 0.8);

    // First interior row and column touch the empty ring.
    assert_eq!(model.boundary()[(1, 5)], 0.8);
    assert_eq!(model.boundary()[(7, 1)], 0.8);
    // Region 1 next to region 2 is not a boundary.
    assert_eq!(model.boundary()[(14, 6)], 0.0);
    assert_eq!(model.boundary()[(0, 0)], 0.0);
}

#[test]
fn test_sample_plate_rings() {
    let description = ModelDescription::from_json(PLATE).unwrap();
    let ids = description.region_grid().unwrap();
    let mut stepper = ReferenceStepper::new(ids, 1.0, coefficients_of(&description));
    stepper.model_mut().set_input_position(4, 8).unwrap();
    stepper.model_mut().set_output_position(10, 8).unwrap();

    let mut excitation = vec![0.0f32; 400];
    excitation[0] = 1.0;
    let mut output = vec![0.0f32; 400];
    stepper.render(&excitation, &mut output);

    // Input and listener are six cells apart.
    assert!(output[..6].iter().all(|&s| s == 0.0));
    assert!(output[6] != 0.0);
    assert!(output.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    assert!(stepper.energy() > 0.0);
}

#[test]
fn test_wavetable_strike() {
    let description = ModelDescription::from_json(PLATE).unwrap();
    let ids = description.region_grid().unwrap();
    let mut stepper = ReferenceStepper::new(ids, 1.0, coefficients_of(&description));
    stepper.model_mut().set_input_position(6, 6).unwrap();
    stepper.model_mut().set_output_position(8, 9).unwrap();

    let mut exciter = WavetableExciter::sine(44_100);
    exciter.trigger();

    let mut excitation = vec![0.0f32; 512];
    exciter.fill(&mut excitation);
    assert!(excitation.iter().any(|&s| s != 0.0));
    assert_eq!(excitation[exciter.burst_samples()..].iter().sum::<f32>(), 0.0);

    let mut output = vec![0.0f32; 512];
    stepper.render(&excitation, &mut output);
    assert!(output.iter().any(|&s| s != 0.0));
}

#[test]
fn test_round_trip_through_description() {
    let mut ids = Grid::new(5, 4);
    ids[(2, 1)] = 1;
    ids[(2, 2)] = 2;

    let description = ModelDescription::new(&ids, DEFAULT_MEMBRANE_KERNEL);
    let parsed = ModelDescription::from_json(&description.to_json().unwrap()).unwrap();

    assert_eq!(parsed.region_grid().unwrap(), ids);
    assert_eq!(parsed.buffer[2][2], 2);
    assert!(parsed.controller().unwrap().coefficients.is_empty());
}

#[test]
fn test_ragged_description_rejected() {
    let text = r#"{"buffer": [[0, 0, 0], [0, 1]], "controllers": [{"physics_kernel": ""}]}"#;
    assert!(matches!(
        ModelDescription::from_json(text),
        Err(EngineError::ModelLoad(_))
    ));
}
