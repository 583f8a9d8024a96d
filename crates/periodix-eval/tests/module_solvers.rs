//! Coverage for the `dsrf` module solver beyond the debt-sizing scenario
//! already exercised in `scenario_end_to_end.rs`.

use periodix_eval::docs::{
    CalculationsDocument, Config, InputGroup, InputItem, InputsDocument, KeyPeriod, Module, ModuleInputs,
};
use periodix_eval::Engine;

fn inputs() -> InputsDocument {
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
            start_month: 1,
            end_year: 2025,
            end_month: 12,
        }], // F1 active for the whole modeled horizon
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

#[test]
fn dsrf_sizes_the_facility_to_the_forward_window_of_debt_service() {
    let mut module_inputs = ModuleInputs::default();
    module_inputs.insert("operationsFlagRef".into(), serde_json::json!("F1"));
    module_inputs.insert("debtServiceRef".into(), serde_json::json!("C1"));
    module_inputs.insert("facilityMonthsRef".into(), serde_json::json!(3.0));
    module_inputs.insert("baseMarginPctRef".into(), serde_json::json!(1.75));

    let calcs = CalculationsDocument {
        calculations: vec![],
        modules: vec![Module {
            template_id: "dsrf".into(),
            enabled: true,
            converted: false,
            inputs: module_inputs,
        }],
        m_ref_map: Default::default(),
    };
    let mut e = Engine::new(inputs(), calcs);
    e.run();

    let limit = e.module_output("M1.1").unwrap();
    let fees = e.module_output("M1.2").unwrap();
    let margin = e.module_output("M1.3").unwrap();

    for t in 0..9 {
        assert_eq!(limit.get(t), 300.0, "facility limit at t={t}");
    }
    assert!(fees.iter().all(|&v| v == 0.0));
    assert!(margin.iter().all(|&v| v == 1.75));
}

#[test]
fn dsrf_is_inactive_when_the_activation_flag_is_off() {
    let mut module_inputs = ModuleInputs::default();
    module_inputs.insert("dsrfActiveRef".into(), serde_json::json!(0.0));

    let calcs = CalculationsDocument {
        calculations: vec![],
        modules: vec![Module {
            template_id: "dsrf".into(),
            enabled: true,
            converted: false,
            inputs: module_inputs,
        }],
        m_ref_map: Default::default(),
    };
    let mut e = Engine::new(inputs(), calcs);
    e.run();
    let limit = e.module_output("M1.1").unwrap();
    assert!(limit.iter().all(|&v| v == 0.0));
}
