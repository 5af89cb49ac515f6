pub mod negotiationdtos;
