use crate::domain::payment::{PaymentMethod, PaymentRequest};
use crate::domain::plan::Plan;
use crate::error::{FieldErrors, PlatformError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WizardStep {
    /// Payment method and location.
    #[default]
    Details,
    /// Provider-specific payer identifier and confirmation.
    Payment,
}

impl WizardStep {
    pub fn number(&self) -> u8 {
        match self {
            WizardStep::Details => 1,
            WizardStep::Payment => 2,
        }
    }
}

/// Form fields as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentForm {
    pub payment_method: String,
    pub location: String,
    pub payer_identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    PaymentMethod,
    Location,
    PayerIdentifier,
}

/// Two-step checkout form controller.
///
/// Step 1 collects the payment method (and a location for non-online plans);
/// step 2 collects the provider-specific payer identifier. Validation errors
/// are kept per field and block progression.
#[derive(Debug, Clone, Default)]
pub struct PaymentWizard {
    step: WizardStep,
    form: PaymentForm,
    errors: FieldErrors,
    plan: Option<Plan>,
}

impl PaymentWizard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts over for a newly selected plan.
    pub fn open(&mut self, plan: Plan) {
        self.reset();
        self.plan = Some(plan);
    }

    /// Clears step, form data, errors and the selected plan.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn form(&self) -> &PaymentForm {
        &self.form
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn is_online(&self) -> bool {
        self.plan.as_ref().is_some_and(Plan::is_online)
    }

    /// Updates one field and drops any error shown for it.
    pub fn set(&mut self, field: FormField, value: impl Into<String>) {
        let value = value.into();
        match field {
            FormField::PaymentMethod => {
                self.errors.remove("paymentMethod");
                self.form.payment_method = value;
            }
            FormField::Location => {
                self.errors.remove("location");
                self.form.location = value;
            }
            FormField::PayerIdentifier => {
                self.errors.remove("phoneNumber");
                self.errors.remove("binancePayId");
                self.form.payer_identifier = value;
            }
        }
    }

    /// Moves from step 1 to step 2 if the details are valid.
    pub fn next(&mut self) -> Result<()> {
        let mut errors = FieldErrors::new();
        let method = self.form.payment_method.trim();
        if method.is_empty() {
            errors.insert("paymentMethod", "Payment method is required");
        } else if let Err(PlatformError::Validation(e)) = method.parse::<PaymentMethod>() {
            for (field, message) in e.iter() {
                errors.insert(field, message);
            }
        }
        if !self.is_online() && self.form.location.trim().is_empty() {
            errors.insert("location", "Location is required");
        }

        self.errors = errors.clone();
        errors.into_result()?;
        self.step = WizardStep::Payment;
        Ok(())
    }

    /// Returns to step 1 keeping everything entered so far.
    pub fn back(&mut self) {
        self.step = WizardStep::Details;
    }

    /// Builds the provider request from step 2.
    ///
    /// Failures are recorded on the wizard's error map as well as returned.
    pub fn payment_request(&mut self, email: &str) -> Result<PaymentRequest> {
        let Some(plan) = self.plan.as_ref() else {
            return Err(PlatformError::invalid("plan", "No plan selected"));
        };
        if self.step != WizardStep::Payment {
            return Err(PlatformError::invalid("step", "Complete the first step"));
        }
        let built = self
            .form
            .payment_method
            .parse::<PaymentMethod>()
            .and_then(|method| {
                let amount = plan.amount()?;
                PaymentRequest::new(method, &self.form.payer_identifier, amount, plan.id, email)
            });
        if let Err(PlatformError::Validation(errors)) = &built {
            for (field, message) in errors.iter() {
                self.errors.insert(field, message);
            }
        }
        built
    }
}
