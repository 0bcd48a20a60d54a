/// Base name of `T` as seen in `std::any::type_name`, without module path or generic
/// parameters, e.g. `StylizeStrategy` for `my_crate::StylizeStrategy<Engine>`.
pub fn base_type_name<T>() -> String {
    let type_name = tynm::type_name::<T>();
    let base = type_name.split('<').next().unwrap_or(type_name.as_str());
    base.trim_end_matches("::").to_string()
}
