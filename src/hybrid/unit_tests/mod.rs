mod harness;

#[cfg(test)]
mod layout_scheme_tests;
#[cfg(test)]
mod mmio_tests;
#[cfg(test)]
mod persist_tests;
#[cfg(test)]
mod pipeline_tests;
#[cfg(test)]
mod prefetch_tests;
