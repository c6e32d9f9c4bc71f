//! 业务能力层：数据源、接收端、计算器

pub mod calculator;
pub mod http_json_source;
pub mod json_file_source;
pub mod source;

pub use calculator::{default_calculator_factory, Calculator, CalculatorFactory, VarsityCalculator};
pub use http_json_source::HttpJsonSource;
pub use json_file_source::{JsonFileSource, RatingList};
pub use source::{DataReceiver, HeadingSource, SourceContext, SourceDescriptor, SourceRegistry};
