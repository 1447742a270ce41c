//! Property tests for the per-file counters and the line accumulator.

use proptest::prelude::*;

use asmpp::{Encoding, GlobalAsmBlock, GlobalState, OptLevel, Opts};

fn base_opts() -> Opts {
    let enc = Encoding::from_label("latin1").unwrap();
    Opts {
        opt: OptLevel::O2,
        framepointer: false,
        mips1: false,
        kpic: false,
        pascal: false,
        input_enc: enc,
        output_enc: enc,
        enable_cutscene_data_float_encoding: false,
    }
}

#[test]
fn magic_values_stay_unique_across_the_low_half_boundary() {
    // 0xE0123456 → 0xE0130000 takes ~52k steps; cross it and then some.
    let mut state = GlobalState::new(&base_opts());
    let mut prev = 0u32;
    for _ in 0..120_000 {
        let value = u32::from_be_bytes(state.next_late_rodata_hex());
        assert_ne!(value & 0xffff, 0);
        assert!(value > prev);
        prev = value;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn names_never_collide(categories in proptest::collection::vec("[a-z]{1,12}", 1..50)) {
        let mut state = GlobalState::new(&base_opts());
        let mut seen = std::collections::HashSet::new();
        for cat in &categories {
            let name = state.make_name(cat);
            prop_assert!(name.starts_with("_asmpp_"));
            prop_assert!(seen.insert(name));
        }
    }

    #[test]
    fn process_line_never_panics(lines in proptest::collection::vec("[ -~]{0,60}", 0..40)) {
        let enc = Encoding::from_label("latin1").unwrap();
        let mut block = GlobalAsmBlock::new("fuzz block".to_string());
        // seed a glabel so instruction lines are acceptable
        let _ = block.process_line("glabel fuzz_entry", &enc);
        for line in &lines {
            // errors are fine, panics are not
            if block.process_line(line, &enc).is_err() {
                break;
            }
        }
    }

    #[test]
    fn finish_sizes_are_consistent(n_instrs in 2usize..40, n_words in 0usize..8) {
        let enc = Encoding::from_label("latin1").unwrap();
        let mut state = GlobalState::new(&base_opts());
        let mut block = GlobalAsmBlock::new("fuzz block".to_string());
        block.process_line("glabel fuzz_entry", &enc).unwrap();
        for _ in 0..n_instrs {
            block.process_line("nop", &enc).unwrap();
        }
        if n_words > 0 {
            block.process_line(".data", &enc).unwrap();
            for _ in 0..n_words {
                block.process_line(".word 1", &enc).unwrap();
            }
        }
        let (src, function) = block.finish(&mut state).unwrap();
        prop_assert_eq!(src.len(), 2 + n_instrs + if n_words > 0 { 1 + n_words } else { 0 });
        prop_assert_eq!(function.data.text.1, 4 * n_instrs);
        prop_assert_eq!(function.data.data.1, 4 * n_words);
    }
}
