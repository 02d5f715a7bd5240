use std::any::Any;

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return (*msg).to_string();
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return msg.clone();
	}
	"non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
	use std::panic;

	use super::panic_message;

	#[test]
	fn extracts_static_str_payload() {
		let payload = panic::catch_unwind(|| panic!("boom-str")).unwrap_err();
		assert_eq!(panic_message(&*payload), "boom-str");
	}

	#[test]
	fn extracts_string_payload() {
		let payload = panic::catch_unwind(|| panic!("{}", String::from("boom-string"))).unwrap_err();
		assert_eq!(panic_message(&*payload), "boom-string");
	}

	#[test]
	fn falls_back_for_opaque_payload() {
		let payload = panic::catch_unwind(|| panic::panic_any(42u32)).unwrap_err();
		assert_eq!(panic_message(&*payload), "non-string panic payload");
	}
}
