use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "template.pest"]
pub struct TemplateParser;
