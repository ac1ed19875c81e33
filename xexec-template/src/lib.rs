mod grammar;
mod template;

pub use template::{
    contains_placeholder, expand_vars, parse_template, substitute_placeholder, Segment,
    RESULT_FILE_PLACEHOLDER,
};
