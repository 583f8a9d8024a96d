//! Builds the reference map: the dense `name -> Array` table the formula
//! evaluator reads and writes into. Grounded directly on the reference
//! implementation's `build_flag_refs` / `build_indexation_refs` /
//! `build_input_group_refs`, preserving their quirks bit-exact (the
//! "constants group id 100" renumbering, the per-mode counters that admit
//! an unrecognized `groupType` falling back to the `V` prefix).

use std::collections::HashMap;

use rustc_hash::FxHashMap;

use periodix_common::Series;

use crate::docs::{InputGroup, InputItem, InputsDocument, KeyPeriod};
use crate::timeline::Timeline;

/// The `name -> Array` table built once per run and grown monotonically
/// as formula and module nodes are evaluated.
#[derive(Debug, Clone)]
pub struct ReferenceMap {
    periods: usize,
    arrays: FxHashMap<String, Series>,
}

impl ReferenceMap {
    pub fn new(periods: usize) -> Self {
        Self {
            periods,
            arrays: FxHashMap::default(),
        }
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn insert(&mut self, name: impl Into<String>, array: Series) {
        debug_assert_eq!(array.len(), self.periods, "array length must equal P");
        self.arrays.insert(name.into(), array);
    }

    pub fn get(&self, name: &str) -> Option<&Series> {
        self.arrays.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    /// The array for `name`, or a fresh zero array if absent. The
    /// "missing reference resolves to zero" rule used throughout the
    /// formula language.
    pub fn get_or_zero(&self, name: &str) -> Series {
        self.arrays
            .get(name)
            .cloned()
            .unwrap_or_else(|| Series::zeros(self.periods))
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.arrays.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Series)> {
        self.arrays.iter()
    }
}

/// Build the full reference map: calendar constants, key-period flags,
/// indexation factors and input-group arrays.
pub fn build_reference_map(timeline: &Timeline, inputs: &InputsDocument) -> ReferenceMap {
    let mut map = ReferenceMap::new(timeline.periods());
    for (name, array) in timeline.calendar_constants() {
        map.insert(name, array);
    }
    build_flag_refs(&mut map, &inputs.key_periods, timeline);
    build_indexation_refs(&mut map, &inputs.indices, timeline);
    build_input_group_refs(&mut map, inputs, timeline);
    map
}

fn build_flag_refs(map: &mut ReferenceMap, key_periods: &[KeyPeriod], timeline: &Timeline) {
    let periods = timeline.periods();
    for kp in key_periods {
        let start_total = kp.start_year as i64 * 12 + kp.start_month as i64;
        let end_total = kp.end_year as i64 * 12 + kp.end_month as i64;

        let mut active = Series::zeros(periods);
        let mut start_arr = Series::zeros(periods);
        let mut end_arr = Series::zeros(periods);

        let mut first_idx: Option<usize> = None;
        let mut last_idx: Option<usize> = None;
        for t in 0..periods {
            let pt = timeline.year_at(t) as i64 * 12 + timeline.month_at(t) as i64;
            if start_total <= pt && pt <= end_total {
                active.set(t, 1.0);
                first_idx.get_or_insert(t);
                last_idx = Some(t);
            }
        }
        if let Some(i) = first_idx {
            start_arr.set(i, 1.0);
        }
        if let Some(i) = last_idx {
            end_arr.set(i, 1.0);
        }

        map.insert(format!("F{}", kp.id), active);
        map.insert(format!("F{}.Start", kp.id), start_arr);
        map.insert(format!("F{}.End", kp.id), end_arr);
    }
}

fn build_indexation_refs(
    map: &mut ReferenceMap,
    indices: &[crate::docs::IndexEntry],
    timeline: &Timeline,
) {
    use crate::docs::IndexationPeriod;

    let periods = timeline.periods();
    for idx in indices {
        if idx.name == "None" || idx.id == 1 {
            map.insert(format!("I{}", idx.id), Series::ones(periods));
            continue;
        }

        let start_total = idx.indexation_start_year as i64 * 12 + idx.indexation_start_month as i64;
        let rate = idx.indexation_rate / 100.0;
        let mut arr = Series::zeros(periods);
        for t in 0..periods {
            let pt = timeline.year_at(t) as i64 * 12 + timeline.month_at(t) as i64;
            let value = if pt >= start_total {
                match idx.indexation_period {
                    IndexationPeriod::Monthly => {
                        let months_elapsed = (pt - start_total) as i32;
                        (1.0 + rate / 12.0).powi(months_elapsed)
                    }
                    IndexationPeriod::Annual => {
                        let years_elapsed = timeline.year_at(t) - idx.indexation_start_year;
                        (1.0 + rate).powi(years_elapsed)
                    }
                }
            } else {
                1.0
            };
            arr.set(t, value);
        }
        map.insert(format!("I{}", idx.id), arr);
    }
}

/// One monthly `(year, month)` step of an input group's own period range,
/// which may be the whole timeline or a linked key period's span and can
/// extend outside the timeline (values outside are simply never placed).
fn generate_periods_for_group(
    group: &InputGroup,
    config: &crate::docs::Config,
    key_periods: &[KeyPeriod],
) -> Vec<(i32, u32)> {
    let (mut sy, mut sm, ey, em) = match group.linked_key_period_id {
        Some(id) => match key_periods.iter().find(|k| k.id == id) {
            Some(kp) => (kp.start_year, kp.start_month, kp.end_year, kp.end_month),
            None => (
                config.start_year,
                config.start_month,
                config.end_year,
                config.end_month,
            ),
        },
        None => (
            config.start_year,
            config.start_month,
            config.end_year,
            config.end_month,
        ),
    };

    let mut out = Vec::new();
    while sy < ey || (sy == ey && sm <= em) {
        out.push((sy, sm));
        sm += 1;
        if sm > 12 {
            sm = 1;
            sy += 1;
        }
    }
    out
}

/// Expand one input item to a dense monthly array over its group's own
/// period range (`group_periods.len()` entries, not yet placed onto the
/// timeline).
fn get_values_for_input(inp: &InputItem, group_periods: &[(i32, u32)], group: &InputGroup) -> Vec<f64> {
    let n_periods = group_periods.len();
    let entry_mode = inp
        .entry_mode
        .as_deref()
        .or(group.entry_mode.as_deref())
        .unwrap_or("values");

    if entry_mode == "constant" || group.group_type == "constant" {
        let mut val = inp.value.unwrap_or(0.0);
        let spread = inp.spread_method.as_deref().unwrap_or("lookup");
        if spread == "spread" && n_periods > 0 {
            val /= n_periods as f64;
        }
        return vec![val; n_periods];
    }

    let freq = inp
        .value_frequency
        .as_deref()
        .or(group.frequency.as_deref())
        .unwrap_or("M");

    if entry_mode == "series" || group.entry_mode.as_deref() == Some("series") {
        // The item's own entryMode nests inside a "series" group; only the
        // "constant within series" inner mode is supported (any other inner
        // mode falls through to the sparse `values` handling below).
        let inner_mode = inp.entry_mode.as_deref().unwrap_or("constant");
        if inner_mode == "constant" {
            let mut val = inp.value.unwrap_or(0.0);
            match freq {
                "Q" => val /= 3.0,
                "Y" => val /= 12.0,
                _ => {}
            }
            return vec![val; n_periods];
        }
    }

    let Some(values) = inp.values.as_ref().filter(|v| !v.is_empty()) else {
        return vec![0.0; n_periods];
    };

    if freq == "M" {
        let mut result = vec![0.0; n_periods];
        for (k, v) in values {
            if let Ok(idx) = k.parse::<usize>() {
                if idx < n_periods {
                    result[idx] = *v;
                }
            }
        }
        return result;
    }

    let months_per = if freq == "Q" { 3 } else { 12 };
    let mut result = vec![0.0; n_periods];
    for (k, v) in values {
        let Ok(src_idx) = k.parse::<usize>() else {
            continue;
        };
        let base = src_idx * months_per;
        let spread_val = v / months_per as f64;
        for offset in 0..months_per {
            let mi = base + offset;
            if mi < n_periods {
                result[mi] = spread_val;
            }
        }
    }
    result
}

fn normalize_mode(group: &InputGroup) -> String {
    match group.group_type.as_str() {
        "timing" => "timing".to_string(),
        "constant" => "constant".to_string(),
        _ => {
            let gm = group.entry_mode.as_deref().unwrap_or("values");
            if gm == "lookup" || gm == "lookup2" {
                "lookup".to_string()
            } else {
                gm.to_string()
            }
        }
    }
}

fn prefix_for(mode: &str) -> char {
    match mode {
        "timing" => 'T',
        "series" => 'S',
        "constant" => 'C',
        "lookup" => 'L',
        "values" => 'V',
        _ => 'V',
    }
}

fn build_input_group_refs(map: &mut ReferenceMap, inputs: &InputsDocument, timeline: &Timeline) {
    let periods = timeline.periods();

    let mut tl_lookup: HashMap<(i32, u32), usize> = HashMap::new();
    for t in 0..periods {
        tl_lookup.insert((timeline.year_at(t), timeline.month_at(t)), t);
    }

    let mut inputs_by_group: HashMap<u32, Vec<&InputItem>> = HashMap::new();
    for inp in &inputs.input_glass {
        inputs_by_group.entry(inp.group_id).or_default().push(inp);
    }

    let mut mode_indices: HashMap<String, u32> = HashMap::new();

    for group in &inputs.input_glass_groups {
        let Some(group_inputs) = inputs_by_group.get(&group.id) else {
            continue; // inactive: no inputs reference this group
        };

        let mode = normalize_mode(group);
        let counter = mode_indices.entry(mode.clone()).or_insert(0);
        *counter += 1;
        let group_index = *counter;
        let prefix = prefix_for(&mode);
        let group_ref = format!("{prefix}{group_index}");

        let group_periods = generate_periods_for_group(group, &inputs.config, &inputs.key_periods);

        let mut input_arrays: HashMap<u32, Series> = HashMap::new();
        for inp in group_inputs {
            let values = get_values_for_input(inp, &group_periods, group);
            let entry_mode = inp
                .entry_mode
                .as_deref()
                .or(group.entry_mode.as_deref())
                .unwrap_or("values");

            let mut arr = Series::zeros(periods);
            if entry_mode == "constant" && !values.is_empty() {
                for t in 0..periods {
                    arr.set(t, values[0]);
                }
            } else {
                for (pi, (y, m)) in group_periods.iter().enumerate() {
                    if let Some(&t) = tl_lookup.get(&(*y, *m)) {
                        if let Some(v) = values.get(pi) {
                            arr.set(t, *v);
                        }
                    }
                }
            }
            input_arrays.insert(inp.id, arr);
        }

        let subtotal = Series::sum_into(input_arrays.values(), periods);
        map.insert(group_ref.clone(), subtotal);

        for inp in group_inputs {
            let item_num = if group.id == 100 { inp.id - 99 } else { inp.id };
            let item_ref = format!("{group_ref}.{item_num}");
            let arr = input_arrays
                .get(&inp.id)
                .cloned()
                .unwrap_or_else(|| Series::zeros(periods));
            map.insert(item_ref, arr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::YearMonth;

    fn timeline_2025() -> Timeline {
        Timeline::build(YearMonth::new(2025, 1), YearMonth::new(2025, 12))
    }

    #[test]
    fn identity_index_is_ones() {
        let tl = timeline_2025();
        let indices = vec![crate::docs::IndexEntry {
            id: 1,
            name: "None".into(),
            indexation_start_year: 2025,
            indexation_start_month: 1,
            indexation_rate: 5.0,
            indexation_period: crate::docs::IndexationPeriod::Annual,
        }];
        let mut map = ReferenceMap::new(tl.periods());
        build_indexation_refs(&mut map, &indices, &tl);
        let i1 = map.get("I1").unwrap();
        assert!(i1.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn annual_indexation_compounds_by_calendar_year() {
        let tl = Timeline::build(YearMonth::new(2025, 1), YearMonth::new(2027, 12));
        let indices = vec![crate::docs::IndexEntry {
            id: 2,
            name: "Inflation".into(),
            indexation_start_year: 2025,
            indexation_start_month: 1,
            indexation_rate: 10.0,
            indexation_period: crate::docs::IndexationPeriod::Annual,
        }];
        let mut map = ReferenceMap::new(tl.periods());
        build_indexation_refs(&mut map, &indices, &tl);
        let i2 = map.get("I2").unwrap();
        assert_eq!(i2.get(0), 1.0);
        assert!((i2.get(12) - 1.1).abs() < 1e-9); // 2026, years_elapsed = 1
        assert!((i2.get(24) - 1.21).abs() < 1e-9); // 2027, years_elapsed = 2
    }

    #[test]
    fn flag_marks_single_start_and_end() {
        let tl = timeline_2025();
        let kp = vec![KeyPeriod {
            id: 2,
            start_year: 2025,
            start_month: 3,
            end_year: 2025,
            end_month: 5,
        }];
        let mut map = ReferenceMap::new(tl.periods());
        build_flag_refs(&mut map, &kp, &tl);
        let start = map.get("F2.Start").unwrap();
        let end = map.get("F2.End").unwrap();
        assert_eq!(start.iter().sum::<f64>(), 1.0);
        assert_eq!(end.iter().sum::<f64>(), 1.0);
        assert_eq!(start.get(2), 1.0); // March is index 2
        assert_eq!(end.get(4), 1.0); // May is index 4
    }

    #[test]
    fn group_id_100_renumbers_items() {
        let tl = timeline_2025();
        let doc = InputsDocument {
            config: crate::docs::Config {
                start_year: 2025,
                start_month: 1,
                end_year: 2025,
                end_month: 12,
            },
            key_periods: vec![],
            indices: vec![],
            input_glass_groups: vec![InputGroup {
                id: 100,
                group_type: "constant".into(),
                entry_mode: None,
                frequency: None,
                linked_key_period_id: None,
            }],
            input_glass: vec![InputItem {
                id: 105,
                group_id: 100,
                entry_mode: Some("constant".into()),
                value_frequency: None,
                value: Some(42.0),
                values: None,
                spread_method: None,
            }],
        };
        let mut map = ReferenceMap::new(tl.periods());
        build_input_group_refs(&mut map, &doc, &tl);
        assert!(map.contains("C1.6")); // 105 - 99 == 6
        assert!(!map.contains("C1.105"));
    }

    #[test]
    fn constant_group_broadcasts_full_value() {
        let tl = timeline_2025();
        let doc = InputsDocument {
            config: crate::docs::Config {
                start_year: 2025,
                start_month: 1,
                end_year: 2025,
                end_month: 12,
            },
            key_periods: vec![],
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
        };
        let mut map = ReferenceMap::new(tl.periods());
        build_input_group_refs(&mut map, &doc, &tl);
        let c1 = map.get("C1").unwrap();
        assert_eq!(c1.iter().sum::<f64>(), 1200.0);
        assert!(c1.iter().all(|&v| v == 100.0));
    }
}
