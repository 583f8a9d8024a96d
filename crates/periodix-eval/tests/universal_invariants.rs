//! Universal invariants: properties that must hold of every run,
//! independent of which formulas and inputs are supplied.

use periodix_eval::docs::{
    CalculationsDocument, Calculation, Config, InputGroup, InputItem, InputsDocument, KeyPeriod,
};
use periodix_eval::Engine;

fn inputs_with_key_period() -> InputsDocument {
    InputsDocument {
        config: Config {
            start_year: 2025,
            start_month: 1,
            end_year: 2025,
            end_month: 12,
        },
        key_periods: vec![KeyPeriod {
            id: 1,
            start_year: 2025,
            start_month: 3,
            end_year: 2025,
            end_month: 5,
        }],
        indices: vec![],
        input_glass_groups: vec![InputGroup {
            id: 1,
            group_type: "constant".into(),
            entry_mode: None,
            frequency: None,
            linked_key_period_id: None,
        }],
        input_glass: vec![InputItem {
            id: 1,
            group_id: 1,
            entry_mode: Some("constant".into()),
            value_frequency: None,
            value: Some(100.0),
            values: None,
            spread_method: None,
        }],
    }
}

fn engine() -> Engine {
    let calcs = CalculationsDocument {
        calculations: vec![Calculation {
            id: 1,
            name: "Revenue".into(),
            kind: "flow".into(),
            formula: "C1".into(),
        }],
        modules: vec![],
        m_ref_map: Default::default(),
    };
    Engine::new(inputs_with_key_period(), calcs)
}

#[test]
fn every_reference_array_has_exactly_p_entries() {
    let mut e = engine();
    e.run();
    let periods = e.timeline().periods();
    for name in ["T.DiM", "T.MiY", "F1", "F1.Start", "F1.End", "I1", "C1", "R1"] {
        let arr = e.get_input_ref(name).or_else(|| e.get_result(name)).unwrap_or_else(|| panic!("missing {name}"));
        assert_eq!(arr.len(), periods, "{name} has wrong length");
    }
}

#[test]
fn identity_index_and_months_in_year_are_constant() {
    let mut e = engine();
    e.run();
    let i1 = e.get_input_ref("I1").unwrap();
    assert!(i1.iter().all(|&v| v == 1.0));
    let miy = e.get_input_ref("T.MiY").unwrap();
    assert!(miy.iter().all(|&v| v == 12.0));
}

#[test]
fn quarter_end_flag_matches_calendar_quarters() {
    let mut e = engine();
    e.run();
    let qe = e.get_input_ref("T.QE").unwrap();
    for (t, &v) in qe.iter().enumerate() {
        assert!(v == 0.0 || v == 1.0);
        let month = t % 12 + 1;
        let expected = matches!(month, 3 | 6 | 9 | 12);
        assert_eq!(v == 1.0, expected);
    }
}

#[test]
fn key_period_start_and_end_flags_sum_to_one() {
    let mut e = engine();
    e.run();
    let start = e.get_input_ref("F1.Start").unwrap();
    let end = e.get_input_ref("F1.End").unwrap();
    assert_eq!(start.iter().sum::<f64>(), 1.0);
    assert_eq!(end.iter().sum::<f64>(), 1.0);
}

#[test]
fn hard_dependency_is_written_before_its_dependent() {
    let calcs = CalculationsDocument {
        calculations: vec![
            Calculation {
                id: 1,
                name: "A".into(),
                kind: "flow".into(),
                formula: "C1".into(),
            },
            Calculation {
                id: 2,
                name: "B".into(),
                kind: "flow".into(),
                formula: "R1 * 2".into(),
            },
        ],
        modules: vec![],
        m_ref_map: Default::default(),
    };
    let mut e = Engine::new(inputs_with_key_period(), calcs);
    e.run();
    let r1 = e.get_result("R1").unwrap();
    let r2 = e.get_result("R2").unwrap();
    for t in 0..r1.len() {
        assert_eq!(r2.get(t), r1.get(t) * 2.0);
    }
}

#[test]
fn two_consecutive_runs_are_idempotent() {
    let calcs = CalculationsDocument {
        calculations: vec![Calculation {
            id: 1,
            name: "A".into(),
            kind: "flow".into(),
            formula: "CUMSUM(C1)".into(),
        }],
        modules: vec![],
        m_ref_map: Default::default(),
    };
    let mut e = Engine::new(inputs_with_key_period(), calcs);
    e.run();
    let first = e.get_result("R1").unwrap().clone();
    e.run();
    let second = e.get_result("R1").unwrap().clone();
    assert_eq!(first, second);
}
