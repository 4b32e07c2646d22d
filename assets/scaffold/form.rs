use framefox::form::{Field, FormBuilder, FormType};

pub struct {{ pascal }}Type;

impl FormType for {{ pascal }}Type {
    fn name(&self) -> &str {
        "{{ snake }}"
    }

    fn build_form(&self, builder: FormBuilder) -> FormBuilder {
        builder
{%- for field in fields if field.form_field %}
            .add(Field::{{ field.form_field }}("{{ field.name }}"){% if field.required %}.required(){% endif %})
{%- endfor %}
    }
}
