use super::Settings;
use crate::jvm::code::{LineNumber, LineNumberEntry};
use crate::jvm::ClassPool;

/// Moves the line numbers of inlined bodies out of the way of the lines around them
///
/// After inlining, a method's line number table holds line numbers from several methods, possibly
/// from several source files. Each inlined body is bracketed by an `Enter` and an `Exit` sentinel.
/// This pass shifts the lines of every inlined body above all the lines used before it in the
/// same class, so that stack traces stay unambiguous. Then it resolves the sentinels: `Enter`
/// entries are dropped, and `Exit` entries become ordinary entries for the line around the call.
///
/// This must only run once all inlining is done, since shifts depend on every line used in the
/// class.
pub struct LineNumberLinearizer<'s> {
    settings: &'s Settings,
}

/// Inlined body whose lines are being shifted
struct Block {
    /// Shift of the enclosing body
    shift: u32,

    /// Line of the entry just before the body
    line: u32,
    source: Option<String>,
}

impl<'s> LineNumberLinearizer<'s> {
    pub fn new(settings: &'s Settings) -> LineNumberLinearizer<'s> {
        LineNumberLinearizer { settings }
    }

    pub fn run(&self, pool: &mut ClassPool) {
        let mut linearized = 0;
        for class in pool.classes_mut() {
            // Lines used by the class itself, across all methods
            let mut highest = class
                .methods
                .iter()
                .filter_map(|method| method.code.as_ref())
                .filter_map(|code| code.own_line_range())
                .map(|(_, high)| high)
                .max()
                .unwrap_or(0);

            for method in &mut class.methods {
                let code = match &mut method.code {
                    Some(code) => code,
                    None => continue,
                };
                let has_sentinels = code
                    .line_numbers
                    .iter()
                    .any(|entry| entry.line == LineNumber::Enter);
                if !has_sentinels {
                    continue;
                }

                log::trace!("Linearizing line numbers of {}.{}", class.name, method.name);
                let entries = std::mem::take(&mut code.line_numbers);
                code.line_numbers = self.linearize(entries, &mut highest);
                linearized += 1;
            }
        }
        log::debug!("Linearized line numbers of {} methods", linearized);
    }

    /// Shift the lines of inlined bodies in one line number table
    ///
    /// `highest` is the highest line used so far, and gets updated to account for the shifted
    /// bodies.
    pub fn linearize(
        &self,
        entries: Vec<LineNumberEntry>,
        highest: &mut u32,
    ) -> Vec<LineNumberEntry> {
        let mut blocks: Vec<Block> = vec![];
        let mut shift = 0;
        let mut linearized: Vec<LineNumberEntry> = Vec::with_capacity(entries.len());

        for mut entry in entries {
            match entry.line {
                LineNumber::Enter => {
                    let (line, source) = match linearized.last() {
                        Some(previous) => {
                            (previous.line_number().unwrap_or(0), previous.source.clone())
                        }
                        None => (0, None),
                    };
                    blocks.push(Block {
                        shift,
                        line,
                        source,
                    });

                    match entry.source.as_deref().and_then(parse_line_range) {
                        Some((low, high)) => {
                            shift = self.shift_above(*highest, low);
                            *highest = (*highest).max(high.saturating_add(shift));
                        }
                        None => log::warn!(
                            "Inlined body at offset {} has no line range: {:?}",
                            entry.start_pc,
                            entry.source
                        ),
                    }
                }

                LineNumber::Exit => match blocks.pop() {
                    Some(block) => {
                        entry.line = LineNumber::Line(block.line);
                        entry.source = block.source;
                        shift = block.shift;
                        linearized.push(entry);
                    }
                    None => log::warn!(
                        "Unbalanced end of inlined body at offset {}, dropping it",
                        entry.start_pc
                    ),
                },

                LineNumber::Line(line) => {
                    entry.line = LineNumber::Line(line.saturating_add(shift));
                    linearized.push(entry);
                }
            }
        }

        if !blocks.is_empty() {
            log::warn!("{} inlined bodies were never closed", blocks.len());
        }
        linearized
    }

    /// Shift which puts lines starting at `low` above `highest`
    fn shift_above(&self, highest: u32, low: u32) -> u32 {
        let rounding = self.settings.line_number_shift_rounding.max(1);
        if low > highest {
            0
        } else if highest > self.settings.line_number_shift_rounding_limit {
            highest - low + 1
        } else {
            (highest - low + rounding) / rounding * rounding
        }
    }
}

/// Parse the `low:high` suffix of an `Enter` sentinel's source
fn parse_line_range(source: &str) -> Option<(u32, u32)> {
    let mut parts = source.rsplitn(3, ':');
    let high = parts.next()?.parse().ok()?;
    let low = parts.next()?.parse().ok()?;
    parts.next()?;
    Some((low, high))
}

#[cfg(test)]
mod line_number_tests {
    use super::*;

    fn tagged(start_pc: u32, line: u32, source: &str) -> LineNumberEntry {
        LineNumberEntry {
            start_pc,
            line: LineNumber::Line(line),
            source: Some(source.to_owned()),
        }
    }

    fn sentinel(start_pc: u32, line: LineNumber, source: Option<&str>) -> LineNumberEntry {
        LineNumberEntry {
            start_pc,
            line,
            source: source.map(str::to_owned),
        }
    }

    fn lines(entries: &[LineNumberEntry]) -> Vec<(u32, Option<u32>)> {
        entries
            .iter()
            .map(|entry| (entry.start_pc, entry.line_number()))
            .collect()
    }

    #[test]
    fn parses_line_ranges() {
        assert_eq!(parse_line_range("p/A.f(I)V:5:10"), Some((5, 10)));
        assert_eq!(parse_line_range("p/A.f(I)V:0:0"), Some((0, 0)));
        assert_eq!(parse_line_range("5:10"), None);
        assert_eq!(parse_line_range("p/A.f(I)V:x:10"), None);
    }

    #[test]
    fn shifts_are_rounded() {
        let settings = Settings::new();
        let linearizer = LineNumberLinearizer::new(&settings);
        assert_eq!(linearizer.shift_above(120, 5), 1000);
        assert_eq!(linearizer.shift_above(1010, 20), 1000);
        assert_eq!(linearizer.shift_above(4, 5), 0);
        assert_eq!(linearizer.shift_above(60_000, 5), 59_996);
    }

    #[test]
    fn sibling_bodies() {
        let _ = env_logger::builder().is_test(true).try_init();
        let settings = Settings::new();
        let linearizer = LineNumberLinearizer::new(&settings);
        let f = "p/A.f()V:5:10";
        let g = "p/B.g()V:20:25";

        let mut highest = 120;
        let linearized = linearizer.linearize(
            vec![
                LineNumberEntry::line(0, 100),
                sentinel(2, LineNumber::Enter, Some(f)),
                tagged(2, 5, f),
                tagged(4, 10, f),
                sentinel(6, LineNumber::Exit, None),
                sentinel(6, LineNumber::Enter, Some(g)),
                tagged(6, 20, g),
                tagged(8, 25, g),
                sentinel(10, LineNumber::Exit, None),
                LineNumberEntry::line(10, 120),
            ],
            &mut highest,
        );

        assert_eq!(
            lines(&linearized),
            vec![
                (0, Some(100)),
                (2, Some(1005)),
                (4, Some(1010)),
                (6, Some(100)),
                (6, Some(1020)),
                (8, Some(1025)),
                (10, Some(100)),
                (10, Some(120)),
            ]
        );
        assert_eq!(highest, 1025);
        assert_eq!(linearized[3].source, None);
        assert_eq!(linearized[4].source.as_deref(), Some(g));
    }

    #[test]
    fn nested_bodies() {
        let settings = Settings::new();
        let linearizer = LineNumberLinearizer::new(&settings);
        let f = "p/A.f()V:5:10";
        let g = "p/B.g()V:20:25";

        let mut highest = 120;
        let linearized = linearizer.linearize(
            vec![
                LineNumberEntry::line(0, 7),
                sentinel(1, LineNumber::Enter, Some(f)),
                tagged(1, 5, f),
                sentinel(2, LineNumber::Enter, Some(g)),
                tagged(2, 20, g),
                sentinel(3, LineNumber::Exit, None),
                tagged(3, 10, f),
                sentinel(4, LineNumber::Exit, None),
            ],
            &mut highest,
        );

        assert_eq!(
            lines(&linearized),
            vec![
                (0, Some(7)),
                (1, Some(1005)),
                (2, Some(1020)),
                (3, Some(1005)),
                (3, Some(1010)),
                (4, Some(7)),
            ]
        );
        assert_eq!(linearized[3].source.as_deref(), Some(f));
        assert_eq!(highest, 1025);
    }

    #[test]
    fn unrounded_past_the_limit() {
        let mut settings = Settings::new();
        settings.line_number_shift_rounding_limit = 100;
        let linearizer = LineNumberLinearizer::new(&settings);
        let f = "p/A.f()V:5:10";

        let mut highest = 120;
        let linearized = linearizer.linearize(
            vec![
                sentinel(0, LineNumber::Enter, Some(f)),
                tagged(0, 5, f),
                sentinel(1, LineNumber::Exit, None),
            ],
            &mut highest,
        );
        assert_eq!(lines(&linearized), vec![(0, Some(121)), (1, Some(0))]);
        assert_eq!(highest, 126);
    }

    #[test]
    fn unbalanced_sentinels() {
        let _ = env_logger::builder().is_test(true).try_init();
        let settings = Settings::new();
        let linearizer = LineNumberLinearizer::new(&settings);

        let mut highest = 3;
        let linearized = linearizer.linearize(
            vec![
                LineNumberEntry::line(0, 3),
                sentinel(1, LineNumber::Exit, None),
                sentinel(2, LineNumber::Enter, Some("p/A.f()V:1:2")),
                tagged(2, 1, "p/A.f()V:1:2"),
            ],
            &mut highest,
        );
        assert_eq!(lines(&linearized), vec![(0, Some(3)), (2, Some(1001))]);
    }
}
