use std::collections::HashSet;

pub struct Settings {
    /// Inlining stops before a method body grows past this many bytes
    ///
    /// Methods which are already longer are left alone.
    pub max_resulting_code_length: u32,

    /// Allow inlining code which accesses private or package members into other classes or
    /// packages
    ///
    /// Only sound if some later pass widens the access flags of those members.
    pub allow_access_modification: bool,

    /// Return internal inlining failures instead of only logging them
    ///
    /// Useful for debugging: by default a method that cannot be spliced is just left as it was.
    pub debug_failures: bool,

    /// Unit to which line number shifts of inlined bodies are rounded up
    ///
    /// Round shifts make it easier to recognize inlined line numbers in stack traces.
    pub line_number_shift_rounding: u32,

    /// Past this line number, shifts are no longer rounded
    pub line_number_shift_rounding_limit: u32,

    /// Classes (by binary name) whose static initialization has no side effects
    ///
    /// Program classes without a `<clinit>` anywhere in their superclass chain are detected
    /// automatically, and classes outside of the program are always assumed to qualify.
    pub side_effect_free_classes: HashSet<String>,
}

impl Settings {
    pub const DEFAULT_MAX_RESULTING_CODE_LENGTH: u32 = 8000;
    pub const DEFAULT_LINE_NUMBER_SHIFT_ROUNDING: u32 = 1000;
    pub const DEFAULT_LINE_NUMBER_SHIFT_ROUNDING_LIMIT: u32 = 50000;

    pub fn new() -> Settings {
        Settings {
            max_resulting_code_length: Self::DEFAULT_MAX_RESULTING_CODE_LENGTH,
            allow_access_modification: false,
            debug_failures: false,
            line_number_shift_rounding: Self::DEFAULT_LINE_NUMBER_SHIFT_ROUNDING,
            line_number_shift_rounding_limit: Self::DEFAULT_LINE_NUMBER_SHIFT_ROUNDING_LIMIT,
            side_effect_free_classes: HashSet::new(),
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
