pub mod classify_otus;
pub mod edna_classify;
pub mod stages;
pub mod state;
