mod cpp;
mod java;
mod python;

pub use cpp::CppStrategy;
pub use java::JavaStrategy;
pub use python::PythonStrategy;
