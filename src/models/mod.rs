pub mod data;
pub mod definition;
pub mod loaders;

pub use data::{
    heading_code, prepare_student_id, ApplicationData, Capacities, Competition, HeadingData,
};
pub use definition::{DefinitionRecord, InstitutionDefinition};
pub use loaders::{load_definition_file, load_definitions_from_folder};
