pub mod pod;
pub mod spark_application;
