pub mod command;
pub mod fastx;
pub mod file;
pub mod kmer;
pub mod model;
pub mod otu;
pub mod report;
pub mod sequence;
pub mod streams;
pub mod system;
