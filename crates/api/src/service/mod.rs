pub mod generations;
